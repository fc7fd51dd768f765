//! Metadata filters evaluated by Postgres against the `meta` JSONB column.

use pgvecto_store_common::Metadata;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `meta @> {...}`: every key is present with an equal value.
    MetaContains(Metadata),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// Match records whose metadata contains all of the given key/value pairs.
pub fn meta_contains<K, V, I>(pairs: I) -> Filter
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    Filter::MetaContains(
        pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect(),
    )
}

impl Filter {
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Append this filter as a boolean SQL expression with bound parameters.
    pub(crate) fn push_sql(&self, builder: &mut QueryBuilder<'static, Postgres>) {
        match self {
            Filter::MetaContains(meta) => {
                builder.push("meta @> ");
                builder.push_bind(Json(Value::Object(meta.clone())));
            }
            Filter::And(filters) => push_group(builder, filters, " AND ", "TRUE"),
            Filter::Or(filters) => push_group(builder, filters, " OR ", "FALSE"),
        }
    }
}

fn push_group(
    builder: &mut QueryBuilder<'static, Postgres>,
    filters: &[Filter],
    joiner: &str,
    empty: &str,
) {
    if filters.is_empty() {
        builder.push(empty);
        return;
    }

    builder.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            builder.push(joiner);
        }
        filter.push_sql(builder);
    }
    builder.push(")");
}
