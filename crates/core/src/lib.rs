//! pgvecto.rs client and the storage interface vector stores implement.

pub mod config;
pub mod database;
pub mod filters;
pub mod record;
pub mod storage;

pub use self::config::{DatabaseConfig, DistanceOp};
pub use database::{DatabaseHealth, PgVectoRs, PoolStats, VectorDatabase};
pub use filters::{meta_contains, Filter};
pub use record::Record;
pub use storage::VectorStore;
