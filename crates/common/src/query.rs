use crate::schema::TextNode;
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    TextMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    #[default]
    And,
    Or,
}

/// A single constraint over one metadata key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub operator: FilterOperator,
}

impl MetadataFilter {
    /// Equality constraint, the only kind the pgvecto.rs store understands.
    pub fn exact(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            operator: FilterOperator::Eq,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilters {
    pub filters: Vec<MetadataFilter>,
    #[serde(default)]
    pub condition: FilterCondition,
}

impl MetadataFilters {
    pub fn new(filters: Vec<MetadataFilter>) -> Self {
        Self {
            filters,
            condition: FilterCondition::And,
        }
    }

    /// Build a conjunction of equality constraints from `(key, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(key, value)| MetadataFilter::exact(key, value))
                .collect(),
        )
    }

    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The filters as plain equality constraints; any other operator is rejected.
    pub fn legacy_filters(&self) -> Result<Vec<(&str, &Value)>> {
        self.filters
            .iter()
            .map(|filter| {
                if filter.operator != FilterOperator::Eq {
                    return Err(StoreError::UnsupportedFilter(format!(
                        "operator {:?} on key '{}'; only exact-match filters are supported",
                        filter.operator, filter.key
                    )));
                }
                Ok((filter.key.as_str(), &filter.value))
            })
            .collect()
    }
}

/// A similarity query against a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreQuery {
    #[serde(default)]
    pub query_embedding: Option<Vec<f32>>,
    #[serde(default = "default_top_k")]
    pub similarity_top_k: usize,
    #[serde(default)]
    pub filters: Option<MetadataFilters>,
    #[serde(default)]
    pub query_str: Option<String>,
}

fn default_top_k() -> usize {
    1
}

impl Default for VectorStoreQuery {
    fn default() -> Self {
        Self {
            query_embedding: None,
            similarity_top_k: default_top_k(),
            filters: None,
            query_str: None,
        }
    }
}

impl VectorStoreQuery {
    pub fn new(query_embedding: Vec<f32>, similarity_top_k: usize) -> Self {
        Self {
            query_embedding: Some(query_embedding),
            similarity_top_k,
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: MetadataFilters) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Parallel sequences of matched nodes, their scores and their ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreQueryResult {
    pub nodes: Vec<TextNode>,
    pub similarities: Vec<f32>,
    pub ids: Vec<String>,
}

impl VectorStoreQueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
