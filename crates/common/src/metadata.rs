//! Flattening nodes into a metadata mapping and rebuilding them from one.
//!
//! Stores that only persist `(text, metadata, embedding)` keep the rest of the
//! node as a JSON string under `_node_content`, so a node read back from the
//! store carries the same relationships and templates it was written with.

use crate::schema::{Metadata, TextNode};
use crate::{Result, StoreError};
use serde_json::Value;

pub const NODE_CONTENT_KEY: &str = "_node_content";
pub const NODE_TYPE_KEY: &str = "_node_type";
pub const DOCUMENT_ID_KEY: &str = "document_id";
pub const DOC_ID_KEY: &str = "doc_id";
pub const REF_DOC_ID_KEY: &str = "ref_doc_id";

const DOCUMENT_NODE_TYPE: &str = "Document";

/// Flatten a node into a metadata mapping suitable for a store record.
///
/// With `remove_text` the serialized node carries an empty text, because the
/// store keeps the text in its own column. With `flat_metadata` every user
/// metadata value must be a scalar.
pub fn node_to_metadata_dict(
    node: &TextNode,
    remove_text: bool,
    flat_metadata: bool,
) -> Result<Metadata> {
    if flat_metadata {
        validate_is_flat(&node.metadata)?;
    }

    let mut metadata = node.metadata.clone();

    let mut node_value = serde_json::to_value(node)
        .map_err(|e| StoreError::Serialization(format!("Failed to serialize node: {}", e)))?;
    if let Value::Object(fields) = &mut node_value {
        fields.remove("embedding");
        if remove_text {
            fields.insert("text".to_string(), Value::String(String::new()));
        }
    }
    let node_content = serde_json::to_string(&node_value)
        .map_err(|e| StoreError::Serialization(format!("Failed to serialize node: {}", e)))?;

    metadata.insert(NODE_CONTENT_KEY.to_string(), Value::String(node_content));
    metadata.insert(
        NODE_TYPE_KEY.to_string(),
        Value::String(TextNode::class_name().to_string()),
    );

    // Source relationship first, then a ref_doc_id the caller put in metadata.
    let ref_doc_id = node
        .ref_doc_id()
        .or_else(|| node.metadata.get(REF_DOC_ID_KEY).and_then(Value::as_str))
        .map(str::to_string);

    for key in [DOCUMENT_ID_KEY, DOC_ID_KEY, REF_DOC_ID_KEY] {
        match &ref_doc_id {
            Some(id) => {
                metadata.insert(key.to_string(), Value::String(id.clone()));
            }
            None => {
                metadata
                    .entry(key)
                    .or_insert_with(|| Value::String("None".to_string()));
            }
        }
    }

    Ok(metadata)
}

/// Rebuild a node from a mapping produced by [`node_to_metadata_dict`].
///
/// `text`, when given, replaces the text stored inside `_node_content`.
pub fn metadata_dict_to_node(metadata: &Metadata, text: Option<&str>) -> Result<TextNode> {
    let node_content = metadata
        .get(NODE_CONTENT_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Metadata("Node content not found in metadata dict".to_string()))?;

    match metadata.get(NODE_TYPE_KEY).and_then(Value::as_str) {
        None => {}
        Some(node_type) if node_type == TextNode::class_name() || node_type == DOCUMENT_NODE_TYPE => {}
        Some(other) => {
            return Err(StoreError::Metadata(format!("Unsupported node type: {}", other)));
        }
    }

    let mut node: TextNode = serde_json::from_str(node_content)
        .map_err(|e| StoreError::Metadata(format!("Invalid node content: {}", e)))?;

    if let Some(text) = text {
        node.text = text.to_string();
    }

    Ok(node)
}

fn validate_is_flat(metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(StoreError::Metadata(format!(
                "Value for metadata key '{}' must be one of (str, int, float, bool, null)",
                key
            )));
        }
    }
    Ok(())
}
