pub mod metadata;
pub mod query;
pub mod schema;

pub use metadata::{metadata_dict_to_node, node_to_metadata_dict};
pub use query::{
    FilterCondition, FilterOperator, MetadataFilter, MetadataFilters, VectorStoreQuery,
    VectorStoreQueryResult,
};
pub use schema::{Metadata, MetadataMode, NodeRelationship, RelatedNode, RelatedNodeInfo, TextNode};

// Error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(
        "pgvecto.rs extension `vectors` is not available: {0}. \
         Install pgvecto.rs on the server (https://github.com/tensorchord/pgvecto.rs) \
         and make sure the connecting role may run CREATE EXTENSION"
    )]
    ExtensionMissing(String),

    #[error("Embedding not set for node {0}")]
    MissingEmbedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
