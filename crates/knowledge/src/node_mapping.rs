use pgvecto_store_common::metadata::REF_DOC_ID_KEY;
use pgvecto_store_common::{
    metadata_dict_to_node, node_to_metadata_dict, FilterCondition, MetadataFilters, MetadataMode,
    Result, TextNode,
};
use pgvecto_store_core::{meta_contains, Filter, Record};
use serde_json::Value;

/// Project a node onto a record: text without metadata, metadata flattened
/// without text, embedding as-is.
pub fn node_to_record(node: &TextNode) -> Result<Record> {
    let embedding = node.get_embedding()?.to_vec();
    let meta = node_to_metadata_dict(node, true, true)?;
    Ok(Record::new(
        node.id.clone(),
        node.get_content(MetadataMode::None),
        meta,
        embedding,
    ))
}

/// Rebuild the node a record was written from. The embedding is not restored.
pub fn record_to_node(record: &Record) -> Result<TextNode> {
    metadata_dict_to_node(&record.meta, Some(&record.text))
}

/// Filter selecting every record parsed from document `ref_doc_id`.
pub fn ref_doc_filter(ref_doc_id: &str) -> Filter {
    meta_contains([(REF_DOC_ID_KEY, Value::String(ref_doc_id.to_string()))])
}

/// Translate framework filters into a metadata filter. No filters means no
/// filter at all rather than an always-true one.
pub fn query_filter(filters: Option<&MetadataFilters>) -> Result<Option<Filter>> {
    let filters = match filters {
        Some(filters) if !filters.is_empty() => filters,
        _ => return Ok(None),
    };

    let pairs = filters.legacy_filters()?;
    let filter = match filters.condition {
        FilterCondition::And => {
            meta_contains(pairs.into_iter().map(|(key, value)| (key, value.clone())))
        }
        FilterCondition::Or => Filter::Or(
            pairs
                .into_iter()
                .map(|(key, value)| meta_contains([(key, value.clone())]))
                .collect(),
        ),
    };
    Ok(Some(filter))
}
