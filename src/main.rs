use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pgvecto_store_common::{FilterCondition, MetadataFilters, TextNode, VectorStoreQuery};
use pgvecto_store_core::{DatabaseConfig, DistanceOp, PgVectoRs, VectorStore};
use pgvecto_store_knowledge::PgVectoRsStore;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Maintenance tool for pgvecto.rs backed vector store collections.
///
/// Connection settings come from `PGVECTO_RS_*` environment variables
/// (a `.env` file is honoured); flags override them.
#[derive(Debug, Parser)]
#[command(name = "pgvecto-store", version)]
struct Cli {
    /// Postgres connection URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Collection name
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Embedding dimension
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Distance operator: l2, dot or cos
    #[arg(long, global = true)]
    distance: Option<DistanceOp>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the extension and collection table
    Init {
        /// Drop the collection first
        #[arg(long)]
        recreate: bool,
        /// Also build a vector index for the configured distance
        #[arg(long)]
        index: bool,
    },
    /// Check connectivity and extension status
    Health,
    /// Number of records in the collection
    Count,
    /// Insert nodes from a JSONL file, one embedded node per line
    Add { file: PathBuf },
    /// Nearest-neighbour query
    Query {
        /// Embedding as a JSON array or comma separated floats
        #[arg(long)]
        embedding: String,
        #[arg(long, default_value_t = 4)]
        top_k: usize,
        /// Metadata equality filter, key=value (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Match any filter instead of all
        #[arg(long)]
        any: bool,
    },
    /// Delete every node of a source document
    Delete { ref_doc_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgvecto_store=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = DatabaseConfig::load_env().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    if let Command::Init { recreate: true, .. } = cli.command {
        config.recreate = true;
    }
    config.validate()?;

    info!(collection = %config.collection_name, "Connecting to pgvecto.rs");

    if !needs_schema(&cli.command) {
        let client = PgVectoRs::connect_lazy(config)?;
        let outcome = inspect(&client, &cli.command).await;
        client.close().await;
        return outcome;
    }

    let distance = config.distance;
    let store = PgVectoRsStore::connect(config).await?;
    let outcome = run(&store, cli.command, distance).await;
    store.client().close().await;
    outcome
}

/// Read-only commands run without creating the extension or the table.
fn needs_schema(command: &Command) -> bool {
    !matches!(command, Command::Health | Command::Count)
}

async fn inspect(client: &PgVectoRs, command: &Command) -> Result<()> {
    match command {
        Command::Health => {
            let health = client.health_check().await?;
            print_json(&json!({
                "healthy": health.is_healthy,
                "connectivity_ms": health.connectivity_ms,
                "extension_version": health.extension_version,
                "error": health.error_message,
                "pool": {
                    "total": health.pool_stats.connections_total,
                    "idle": health.pool_stats.connections_idle,
                    "in_use": health.pool_stats.connections_in_use,
                },
            }));
        }
        Command::Count => {
            print_json(&json!({ "count": client.count().await? }));
        }
        _ => bail!("command needs the collection schema"),
    }
    Ok(())
}

async fn run(store: &PgVectoRsStore, command: Command, distance: DistanceOp) -> Result<()> {
    match command {
        Command::Init { index, .. } => {
            if index {
                store.client().create_index(distance).await?;
            }
            print_json(&json!({ "table": store.client().table_name(), "index": index }));
        }
        Command::Add { file } => {
            let nodes = read_nodes(&file).await?;
            let ids = store.add(&nodes).await?;
            print_json(&json!({ "ids": ids }));
        }
        Command::Query {
            embedding,
            top_k,
            filters,
            any,
        } => {
            let mut query = VectorStoreQuery::new(parse_embedding(&embedding)?, top_k);
            if !filters.is_empty() {
                let condition = if any {
                    FilterCondition::Or
                } else {
                    FilterCondition::And
                };
                query = query.with_filters(parse_filters(&filters)?.with_condition(condition));
            }

            let result = store.query(&query).await?;
            let matches: Vec<Value> = result
                .nodes
                .iter()
                .zip(&result.similarities)
                .map(|(node, score)| {
                    json!({
                        "id": node.id,
                        "score": score,
                        "ref_doc_id": node.ref_doc_id(),
                        "text": node.text,
                        "metadata": node.metadata,
                    })
                })
                .collect();
            print_json(&json!({ "results": matches }));
        }
        Command::Delete { ref_doc_id } => {
            store.delete(&ref_doc_id).await?;
            print_json(&json!({ "deleted": ref_doc_id }));
        }
        Command::Health | Command::Count => return inspect(store.client(), &command).await,
    }
    Ok(())
}

fn apply_overrides(config: &mut DatabaseConfig, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection_name = collection.clone();
    }
    if let Some(dimension) = cli.dimension {
        config.dimension = dimension;
    }
    if let Some(distance) = cli.distance {
        config.distance = distance;
    }
}

async fn read_nodes(path: &PathBuf) -> Result<Vec<TextNode>> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut nodes = Vec::new();
    for (line_no, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let node: TextNode = serde_json::from_str(line)
            .with_context(|| format!("Invalid node on line {}", line_no + 1))?;
        nodes.push(node);
    }
    debug!(count = nodes.len(), "Read nodes");
    Ok(nodes)
}

fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw).context("Invalid embedding JSON");
    }
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid embedding component '{}'", part))
        })
        .collect()
}

/// `key=value` pairs; values that parse as JSON keep their type, anything else is a string.
fn parse_filters(raw: &[String]) -> Result<MetadataFilters> {
    let mut pairs = Vec::with_capacity(raw.len());
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("Filter '{}' is not of the form key=value", item);
        };
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        pairs.push((key.to_string(), value));
    }
    Ok(MetadataFilters::from_pairs(pairs))
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}
