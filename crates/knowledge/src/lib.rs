//! Vector store adapter that keeps indexing-framework nodes in a pgvecto.rs collection

pub mod node_mapping;
pub mod vector_store;

pub use node_mapping::{node_to_record, query_filter, record_to_node, ref_doc_filter};
pub use vector_store::PgVectoRsStore;
