//! Cluster adapter: one uniform capability surface over an Elasticsearch
//! cluster, covering the typed (5.x/6.x) and typeless (7.x+) families.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use esbridge_core::{Doc, IndexBundle, Result, ScrollOption, ScrollResult, VersionFamily};
use serde_json::Value;

mod bulk;
mod http;

pub use bulk::{append_bulk_line, BulkFailure, BulkReport};
pub use http::HttpCluster;

/// Operations the engine needs from a cluster. Implementations are immutable
/// after construction and safe to share across tasks; each call builds its
/// own request. The adapter never retries.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn version(&self) -> &str;
    fn family(&self) -> VersionFamily;
    fn addresses(&self) -> &[String];
    fn user(&self) -> &str;
    fn password(&self) -> &str;

    /// All index names from the cluster catalogue.
    async fn indexes(&self) -> Result<Vec<String>>;
    async fn exists(&self, index: &str) -> Result<bool>;

    /// Raw payloads keyed by index name, as the server returns them.
    async fn settings(&self, index: &str) -> Result<Value>;
    async fn mappings(&self, index: &str) -> Result<Value>;
    async fn aliases(&self, index: &str) -> Result<Value>;

    /// Settings+mappings+aliases of one index; `None` when it does not exist.
    async fn bundle(&self, index: &str) -> Result<Option<IndexBundle>>;

    /// Fails when the index already exists.
    async fn create_index(&self, bundle: &IndexBundle) -> Result<()>;
    async fn delete_index(&self, index: &str) -> Result<()>;

    async fn open_scroll(&self, index: &str, option: &ScrollOption) -> Result<ScrollResult>;
    async fn next_scroll(&self, scroll_id: &str, scroll_time: u32) -> Result<ScrollResult>;
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;

    /// Apply a newline-delimited action/source stream. A 2xx response is
    /// still inspected for per-item failures, which are reported, not raised.
    async fn bulk(&self, body: String) -> Result<BulkReport>;

    async fn count(&self, index: &str) -> Result<u64>;
    async fn cluster_health(&self) -> Result<Value>;
    async fn cluster_info(&self) -> Result<Value>;

    /// Append one bulk action for this cluster's version: metadata line plus
    /// an optional body line. Typed clusters carry `_type`, typeless omit it.
    fn serialize_doc(&self, index: &str, doc: &Doc, buf: &mut String) {
        bulk::append_bulk_line(self.family(), index, doc, buf);
    }
}
