//! Esbridge core types: documents, index pairs, scroll plumbing, diff results.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod compare;
mod error;

pub use compare::same_json;
pub use error::{Error, Result};

/// Mapping shape family, derived from the cluster's major version.
///
/// 5.x and 6.x nest mapping properties under a named document type; 7.x and
/// later put `properties` at the top level and treat the type as `_doc`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VersionFamily {
    Typed,
    Typeless,
}

impl VersionFamily {
    pub fn from_version(version: &str) -> Self {
        if version.starts_with("5.") || version.starts_with("6.") {
            VersionFamily::Typed
        } else {
            VersionFamily::Typeless
        }
    }

    /// Whether bulk action lines and document URIs carry a `_type`.
    pub fn needs_type(self) -> bool {
        matches!(self, VersionFamily::Typed)
    }
}

/// Connection parameters for one cluster. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Known version string, e.g. "6.8.23". When absent the adapter probes
    /// the cluster info endpoint at connect time.
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
}

/// One document flowing through the engine.
///
/// The serde field names match a scroll hit, so a page of hits deserializes
/// straight into `Vec<Doc>`. Delete ops carry no source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Value,
    #[serde(skip)]
    pub op: Operation,
}

impl Doc {
    pub fn create(id: impl Into<String>, source: Value) -> Self {
        Self { id: id.into(), doc_type: None, source, op: Operation::Create }
    }

    pub fn update(id: impl Into<String>, source: Value) -> Self {
        Self { id: id.into(), doc_type: None, source, op: Operation::Update }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self { id: id.into(), doc_type: None, source: Value::Null, op: Operation::Delete }
    }

    /// The document type, canonicalized to `_doc` for typeless clusters.
    pub fn type_or_default(&self) -> &str {
        match self.doc_type.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => "_doc",
        }
    }
}

/// A (source index, target index) binding; the unit of migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IndexPair {
    pub source_index: String,
    pub target_index: String,
}

impl IndexPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { source_index: source.into(), target_index: target.into() }
    }

    /// Identity used for keying and dedup within an orchestrator.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source_index, self.target_index)
    }
}

/// Parameters for opening one scroll cursor.
#[derive(Debug, Clone, Default)]
pub struct ScrollOption {
    pub scroll_size: u32,
    /// Scroll TTL in minutes, renewed on every page.
    pub scroll_time: u32,
    pub slice_id: Option<u32>,
    pub slice_count: Option<u32>,
    pub query: Option<Value>,
    pub sort_fields: Vec<String>,
}

/// One page of scroll output plus the cursor to continue it.
#[derive(Debug, Clone)]
pub struct ScrollResult {
    /// Total hits reported by the initial scroll response.
    pub total: u64,
    pub docs: Vec<Doc>,
    pub scroll_id: String,
}

/// Settings, mappings and aliases of one index, as fetched or as to-create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBundle {
    pub index: String,
    pub settings: Value,
    pub mappings: Value,
    pub aliases: Value,
}

/// How many mismatched IDs to remember as examples.
pub const DIFF_SAMPLE_LIMIT: usize = 20;

/// Outcome of comparing one index pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub equal: u64,
    /// Bounded samples of mismatched IDs, capped at [`DIFF_SAMPLE_LIMIT`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_ids: Vec<String>,
}

impl DiffResult {
    pub fn has_diff(&self) -> bool {
        self.created > 0 || self.updated > 0 || self.deleted > 0
    }
}

pub mod prelude {
    pub use super::{
        ClusterDescriptor, DiffResult, Doc, Error, IndexBundle, IndexPair, Operation, Result,
        ScrollOption, ScrollResult, VersionFamily,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_family_by_major_prefix() {
        assert_eq!(VersionFamily::from_version("5.6.16"), VersionFamily::Typed);
        assert_eq!(VersionFamily::from_version("6.8.23"), VersionFamily::Typed);
        assert_eq!(VersionFamily::from_version("7.17.9"), VersionFamily::Typeless);
        assert_eq!(VersionFamily::from_version("8.13.0"), VersionFamily::Typeless);
    }

    #[test]
    fn pair_key_is_source_colon_target() {
        let pair = IndexPair::new("books", "books-v2");
        assert_eq!(pair.key(), "books:books-v2");
    }

    #[test]
    fn doc_deserializes_from_scroll_hit() {
        let hit = serde_json::json!({
            "_index": "books",
            "_type": "book",
            "_id": "1",
            "_score": null,
            "_source": {"title": "a"},
            "sort": ["1"]
        });
        let doc: Doc = serde_json::from_value(hit).unwrap();
        assert_eq!(doc.id, "1");
        assert_eq!(doc.doc_type.as_deref(), Some("book"));
        assert_eq!(doc.source["title"], "a");
        assert_eq!(doc.op, Operation::Create);
    }

    #[test]
    fn missing_type_canonicalizes_to_doc() {
        let doc = Doc::create("1", serde_json::json!({}));
        assert_eq!(doc.type_or_default(), "_doc");
    }
}
