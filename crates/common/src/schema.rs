use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Free-form node metadata. Keys are kept sorted so rendered content is stable.
pub type Metadata = serde_json::Map<String, Value>;

pub const DEFAULT_TEXT_TEMPLATE: &str = "{metadata_str}\n\n{content}";
pub const DEFAULT_METADATA_TEMPLATE: &str = "{key}: {value}";
pub const DEFAULT_METADATA_SEPARATOR: &str = "\n";

/// Which metadata keys are rendered alongside the node text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataMode {
    All,
    Embed,
    Llm,
    None,
}

/// Relationship keys, serialized with the framework's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeRelationship {
    #[serde(rename = "1")]
    Source,
    #[serde(rename = "2")]
    Previous,
    #[serde(rename = "3")]
    Next,
    #[serde(rename = "4")]
    Parent,
    #[serde(rename = "5")]
    Child,
}

/// A relationship target. `Child` links hold a list, the others a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedNode {
    One(RelatedNodeInfo),
    Many(Vec<RelatedNodeInfo>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedNodeInfo {
    pub node_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl RelatedNodeInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            metadata: Metadata::new(),
            hash: None,
        }
    }
}

/// The indexing framework's unit of content: text, metadata and an optional embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    #[serde(rename = "id_")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub relationships: BTreeMap<NodeRelationship, RelatedNode>,
    #[serde(default)]
    pub excluded_embed_metadata_keys: Vec<String>,
    #[serde(default)]
    pub excluded_llm_metadata_keys: Vec<String>,
    #[serde(default = "default_metadata_separator")]
    pub metadata_separator: String,
    #[serde(default = "default_text_template")]
    pub text_template: String,
    #[serde(default = "default_metadata_template")]
    pub metadata_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char_idx: Option<usize>,
}

fn default_metadata_separator() -> String {
    DEFAULT_METADATA_SEPARATOR.to_string()
}

fn default_text_template() -> String {
    DEFAULT_TEXT_TEMPLATE.to_string()
}

fn default_metadata_template() -> String {
    DEFAULT_METADATA_TEMPLATE.to_string()
}

impl TextNode {
    /// Create a node with a random UUID identifier.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text)
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            embedding: None,
            relationships: BTreeMap::new(),
            excluded_embed_metadata_keys: Vec::new(),
            excluded_llm_metadata_keys: Vec::new(),
            metadata_separator: default_metadata_separator(),
            text_template: default_text_template(),
            metadata_template: default_metadata_template(),
            start_char_idx: None,
            end_char_idx: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Link this node to the document it was parsed from.
    pub fn with_ref_doc_id(mut self, ref_doc_id: impl Into<String>) -> Self {
        self.relationships
            .insert(NodeRelationship::Source, RelatedNode::One(RelatedNodeInfo::new(ref_doc_id)));
        self
    }

    pub fn class_name() -> &'static str {
        "TextNode"
    }

    /// Identifier of the source document, if the node has one.
    pub fn ref_doc_id(&self) -> Option<&str> {
        self.relationships
            .get(&NodeRelationship::Source)
            .and_then(|related| match related {
                RelatedNode::One(info) => Some(info.node_id.as_str()),
                RelatedNode::Many(_) => None,
            })
    }

    pub fn get_embedding(&self) -> Result<&[f32]> {
        self.embedding
            .as_deref()
            .ok_or_else(|| StoreError::MissingEmbedding(self.id.clone()))
    }

    /// Render metadata as `key: value` lines, skipping keys excluded for `mode`.
    pub fn get_metadata_str(&self, mode: MetadataMode) -> String {
        let excluded: &[String] = match mode {
            MetadataMode::None => return String::new(),
            MetadataMode::All => &[],
            MetadataMode::Embed => &self.excluded_embed_metadata_keys,
            MetadataMode::Llm => &self.excluded_llm_metadata_keys,
        };

        self.metadata
            .iter()
            .filter(|(key, _)| !excluded.contains(key))
            .map(|(key, value)| {
                let value = display_value(value);
                format_template(&self.metadata_template, &[("key", key), ("value", &value)])
            })
            .collect::<Vec<_>>()
            .join(&self.metadata_separator)
    }

    pub fn get_content(&self, mode: MetadataMode) -> String {
        let metadata_str = self.get_metadata_str(mode);
        let metadata_str = metadata_str.trim();
        if metadata_str.is_empty() {
            return self.text.clone();
        }

        format_template(
            &self.text_template,
            &[("metadata_str", metadata_str), ("content", &self.text)],
        )
        .trim()
        .to_string()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` placeholders in a single pass so substituted text is never re-expanded.
fn format_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (*value, end))
        });

        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
