use crate::config::{DatabaseConfig, DistanceOp};
use crate::filters::Filter;
use crate::record::{parse_vector_literal, vector_literal, Record};
use async_trait::async_trait;
use pgvecto_store_common::{Metadata, Result, StoreError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Records per `INSERT` statement; four bind parameters each keeps us well
/// under the Postgres limit of 65535.
const INSERT_BATCH_SIZE: usize = 1000;

/// Operations the vector store adapter needs from a vector database client.
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Insert all records in one batch.
    async fn insert(&self, records: Vec<Record>) -> Result<()>;

    /// Delete every record matching `filter`, returning how many were removed.
    async fn delete(&self, filter: Filter) -> Result<u64>;

    /// The `top_k` records nearest to `embedding`, best match first, with their scores.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<(Record, f32)>>;
}

/// Client for a pgvecto.rs collection stored in a Postgres table
pub struct PgVectoRs {
    pool: PgPool,
    config: DatabaseConfig,
    table: String,
}

impl PgVectoRs {
    /// Connect, make sure the `vectors` extension is installed and create the collection table.
    #[instrument(skip(config), fields(collection = %config.collection_name))]
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let client = Self::connect(config).await?;
        client.ensure_extension().await?;

        if client.config.recreate {
            client.drop_table().await?;
        }
        client.create_table().await?;

        info!(table = %client.table, "pgvecto.rs collection ready");
        Ok(client)
    }

    /// Open the connection pool without touching the schema.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        info!("Initializing pgvecto.rs connection pool");

        let pool = pool_options(&config)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool, config)
    }

    /// Like [`PgVectoRs::connect`], but no connection is made until the first query.
    pub fn connect_lazy(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let pool = pool_options(&config)
            .connect_lazy(&config.database_url)
            .map_err(|e| StoreError::Database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool, config)
    }

    /// Wrap an existing pool without running any DDL.
    pub fn from_pool(pool: PgPool, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let table = config.table_name();
        Ok(Self {
            pool,
            config,
            table,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    async fn ensure_extension(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vectors")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::ExtensionMissing(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn create_table(&self) -> Result<()> {
        let sql = create_table_sql(&self.table, self.config.dimension);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to create collection table: {}", e)))?;
        debug!("Collection table ensured");
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn drop_table(&self) -> Result<()> {
        warn!("Dropping collection table");
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to drop collection table: {}", e)))?;
        Ok(())
    }

    /// Build a `vectors` index on the embedding column for `distance`.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn create_index(&self, distance: DistanceOp) -> Result<()> {
        info!(%distance, "Creating vector index");
        sqlx::query(&create_index_sql(&self.table, distance))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to create vector index: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(table = %self.table, count = records.len()))]
    pub async fn insert_records(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            debug!("Nothing to insert");
            return Ok(());
        }
        for record in records {
            self.check_dimension(record.embedding.len())?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;

        for chunk in records.chunks(INSERT_BATCH_SIZE) {
            build_insert(&self.table, chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("Failed to insert records: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {}", e)))?;

        debug!("Inserted records");
        Ok(())
    }

    #[instrument(skip(self, embedding, filter), fields(table = %self.table))]
    pub async fn search_with(
        &self,
        embedding: &[f32],
        distance: DistanceOp,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(Record, f32)>> {
        self.check_dimension(embedding.len())?;

        let rows = build_search(&self.table, embedding, distance, top_k, filter)
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to search records: {}", e)))?;

        let results = rows
            .iter()
            .map(decode_scored_record)
            .collect::<Result<Vec<_>>>()?;

        debug!(results = results.len(), "Search completed");
        Ok(results)
    }

    #[instrument(skip(self, filter), fields(table = %self.table))]
    pub async fn delete_where(&self, filter: &Filter) -> Result<u64> {
        let result = build_delete(&self.table, filter)
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to delete records: {}", e)))?;

        let deleted = result.rows_affected();
        if deleted == 0 {
            debug!("Delete matched no records");
        } else {
            debug!(deleted, "Deleted records");
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to count records: {}", e)))
    }

    /// Perform health check on the database connection
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<DatabaseHealth> {
        debug!("Performing database health check");

        let start_time = Instant::now();
        let connectivity_result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        let connectivity_time = start_time.elapsed();

        if let Err(e) = connectivity_result {
            error!("Database connectivity check failed: {}", e);
            return Ok(DatabaseHealth {
                is_healthy: false,
                connectivity_ms: connectivity_time.as_millis() as u64,
                pool_stats: self.pool_stats(),
                extension_version: None,
                error_message: Some(format!("Connectivity check failed: {}", e)),
            });
        }

        let extension_version = sqlx::query_scalar::<_, String>(
            "SELECT extversion FROM pg_extension WHERE extname = 'vectors'",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to read extension version: {}", e)))?;

        let pool_stats = self.pool_stats();
        let is_healthy =
            connectivity_time < Duration::from_millis(1000) && extension_version.is_some();

        let health = DatabaseHealth {
            is_healthy,
            connectivity_ms: connectivity_time.as_millis() as u64,
            pool_stats,
            error_message: extension_version
                .is_none()
                .then(|| "pgvecto.rs extension `vectors` is not installed".to_string()),
            extension_version,
        };

        if health.is_healthy {
            debug!("Database health check passed");
        } else {
            warn!("Database health check indicates degraded state");
        }

        Ok(health)
    }

    /// Get connection pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            connections_total: total,
            connections_idle: idle,
            connections_in_use: total.saturating_sub(idle),
        }
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.config.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorDatabase for PgVectoRs {
    async fn insert(&self, records: Vec<Record>) -> Result<()> {
        self.insert_records(&records).await
    }

    async fn delete(&self, filter: Filter) -> Result<u64> {
        self.delete_where(&filter).await
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<(Record, f32)>> {
        self.search_with(embedding, self.config.distance, top_k, filter.as_ref())
            .await
    }
}

/// Database health information
#[derive(Debug, Clone)]
pub struct DatabaseHealth {
    pub is_healthy: bool,
    pub connectivity_ms: u64,
    pub pool_stats: PoolStats,
    pub extension_version: Option<String>,
    pub error_message: Option<String>,
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections_total: u32,
    pub connections_idle: u32,
    pub connections_in_use: u32,
}

fn create_table_sql(table: &str, dimension: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id TEXT PRIMARY KEY, \
         text TEXT NOT NULL, \
         meta JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
         embedding vector({}) NOT NULL)",
        table, dimension
    )
}

fn create_index_sql(table: &str, distance: DistanceOp) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {table}_embedding_{distance}_idx ON {table} \
         USING vectors (embedding {opclass})",
        table = table,
        distance = distance,
        opclass = distance.index_opclass()
    )
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout());

    if let Some(max_lifetime) = config.max_lifetime() {
        pool_options = pool_options.max_lifetime(max_lifetime);
    }

    if let Some(idle_timeout) = config.idle_timeout() {
        pool_options = pool_options.idle_timeout(idle_timeout);
    }

    pool_options
}

fn build_insert(table: &str, records: &[Record]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("INSERT INTO {} (id, text, meta, embedding) ", table));
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.id.clone())
            .push_bind(record.text.clone())
            .push_bind(Json(record.meta.clone()))
            .push_bind(vector_literal(&record.embedding))
            .push_unseparated("::vector");
    });
    builder
}

fn build_search(
    table: &str,
    embedding: &[f32],
    distance: DistanceOp,
    top_k: usize,
    filter: Option<&Filter>,
) -> QueryBuilder<'static, Postgres> {
    let literal = vector_literal(embedding);
    let op = distance.operator();

    let mut builder = QueryBuilder::new(
        "SELECT id, text, meta, embedding::text AS embedding, (embedding ",
    );
    builder
        .push(op)
        .push(" ")
        .push_bind(literal.clone())
        .push("::vector)::float8 AS distance FROM ")
        .push(table);

    if let Some(filter) = filter {
        builder.push(" WHERE ");
        filter.push_sql(&mut builder);
    }

    // Order by the raw operator expression so a `vectors` index can serve it.
    builder
        .push(" ORDER BY embedding ")
        .push(op)
        .push(" ")
        .push_bind(literal)
        .push("::vector LIMIT ")
        .push_bind(limit_value(top_k));
    builder
}

/// `LIMIT` is a signed bigint; larger requests saturate instead of wrapping negative.
fn limit_value(top_k: usize) -> i64 {
    i64::try_from(top_k).unwrap_or(i64::MAX)
}

fn build_delete(table: &str, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("DELETE FROM {} WHERE ", table));
    filter.push_sql(&mut builder);
    builder
}

fn decode_scored_record(row: &PgRow) -> Result<(Record, f32)> {
    let decode_err = |e: sqlx::Error| StoreError::Database(format!("Failed to decode record: {}", e));

    let id: String = row.try_get("id").map_err(decode_err)?;
    let text: String = row.try_get("text").map_err(decode_err)?;
    let Json(meta): Json<Metadata> = row.try_get("meta").map_err(decode_err)?;
    let embedding: String = row.try_get("embedding").map_err(decode_err)?;
    let distance: f64 = row.try_get("distance").map_err(decode_err)?;

    let record = Record::new(id, text, meta, parse_vector_literal(&embedding)?);
    Ok((record, distance as f32))
}
