use pgvecto_store_common::{Metadata, Result, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of a pgvecto.rs collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub meta: Metadata,
    pub embedding: Vec<f32>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        meta: Metadata,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            meta,
            embedding,
        }
    }

    /// Record with a freshly generated UUID id.
    pub fn from_text(text: impl Into<String>, embedding: Vec<f32>, meta: Metadata) -> Self {
        Self::new(Uuid::new_v4().to_string(), text, meta, embedding)
    }
}

/// Text form of a vector accepted by a `::vector` cast, e.g. `[0.1,0.2]`.
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 8 + 2);
    out.push('[');
    for (i, value) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

/// Parse the `vector::text` output of pgvecto.rs back into floats.
pub(crate) fn parse_vector_literal(literal: &str) -> Result<Vec<f32>> {
    let inner = literal
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| StoreError::Database(format!("Malformed vector literal: {}", literal)))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim().parse::<f32>().map_err(|e| {
                StoreError::Database(format!("Malformed vector component '{}': {}", part, e))
            })
        })
        .collect()
}
