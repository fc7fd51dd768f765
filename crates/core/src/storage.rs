use async_trait::async_trait;
use pgvecto_store_common::{Result, TextNode, VectorStoreQuery, VectorStoreQueryResult};

/// Storage interface the indexing framework drives: embedded nodes in,
/// similarity query results out.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Whether the store keeps node text, so nodes can be rebuilt from query results alone.
    fn stores_text(&self) -> bool;

    fn class_name(&self) -> &'static str;

    /// Persist embedded nodes, returning their ids in input order.
    async fn add(&self, nodes: &[TextNode]) -> Result<Vec<String>>;

    /// Remove every node that was parsed from document `ref_doc_id`.
    async fn delete(&self, ref_doc_id: &str) -> Result<()>;

    async fn query(&self, query: &VectorStoreQuery) -> Result<VectorStoreQueryResult>;
}
