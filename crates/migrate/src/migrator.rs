//! Per-pair orchestration: plan (settings), execute (sync, sync_diff,
//! compare, copy-settings), report.

use std::sync::Arc;

use esbridge_cluster::Cluster;
use esbridge_core::{DiffResult, Doc, Error, IndexPair, Result};
use esbridge_translate::translate;
use serde_json::json;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::defaults;
use crate::diff::DiffEngine;
use crate::producer::ScrollProducer;
use crate::writer::BulkWriterPool;

/// Outcome of one `sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    /// Documents handed to bulk requests that were accepted.
    pub docs_written: u64,
    /// Per-item failures plus documents lost to failed bulk requests.
    pub doc_failures: u64,
}

/// Orchestrates one index pair. Configuration is a chain of consuming
/// `with_*` calls; a zero value collapses to the default, and the first
/// invalid step latches an error that surfaces at the terminal operation.
#[derive(Clone)]
pub struct Migrator {
    source: Arc<dyn Cluster>,
    target: Arc<dyn Cluster>,
    pair: IndexPair,
    scroll_size: u32,
    scroll_time: u32,
    slice_size: u32,
    buffer_count: usize,
    write_parallel: usize,
    write_size: usize,
    compare_parallel: usize,
    ids: Vec<String>,
    cancel: CancellationToken,
    error: Option<Error>,
}

impl Migrator {
    pub fn new(source: Arc<dyn Cluster>, target: Arc<dyn Cluster>, pair: IndexPair) -> Self {
        let error = if pair.source_index.is_empty() || pair.target_index.is_empty() {
            Some(Error::Config(format!("invalid index pair {:?}", pair)))
        } else {
            None
        };
        Self {
            source,
            target,
            pair,
            scroll_size: defaults::SCROLL_SIZE,
            scroll_time: defaults::SCROLL_TIME,
            slice_size: defaults::SLICE_SIZE,
            buffer_count: defaults::BUFFER_COUNT,
            write_parallel: defaults::WRITE_PARALLEL,
            write_size: defaults::WRITE_SIZE,
            compare_parallel: defaults::COMPARE_PARALLEL,
            ids: Vec::new(),
            cancel: CancellationToken::new(),
            error,
        }
    }

    pub fn pair(&self) -> &IndexPair {
        &self.pair
    }

    pub fn with_scroll_size(mut self, scroll_size: u32) -> Self {
        if self.error.is_none() {
            self.scroll_size = if scroll_size == 0 { defaults::SCROLL_SIZE } else { scroll_size };
        }
        self
    }

    pub fn with_scroll_time(mut self, scroll_time: u32) -> Self {
        if self.error.is_none() {
            self.scroll_time = if scroll_time == 0 { defaults::SCROLL_TIME } else { scroll_time };
        }
        self
    }

    pub fn with_slice_size(mut self, slice_size: u32) -> Self {
        if self.error.is_none() {
            self.slice_size = if slice_size == 0 { defaults::SLICE_SIZE } else { slice_size };
        }
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        if self.error.is_none() {
            self.buffer_count =
                if buffer_count == 0 { defaults::BUFFER_COUNT } else { buffer_count };
        }
        self
    }

    pub fn with_write_parallel(mut self, write_parallel: usize) -> Self {
        if self.error.is_none() {
            self.write_parallel =
                if write_parallel == 0 { defaults::WRITE_PARALLEL } else { write_parallel };
        }
        self
    }

    pub fn with_write_size(mut self, write_size: usize) -> Self {
        if self.error.is_none() {
            self.write_size = if write_size == 0 { defaults::WRITE_SIZE } else { write_size };
        }
        self
    }

    pub fn with_compare_parallel(mut self, compare_parallel: usize) -> Self {
        if self.error.is_none() {
            self.compare_parallel =
                if compare_parallel == 0 { defaults::COMPARE_PARALLEL } else { compare_parallel };
        }
        self
    }

    /// Restrict traversal to these document IDs. An empty list means no filter.
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        if self.error.is_none() {
            self.ids = ids;
        }
        self
    }

    /// Cancellation signal propagated to every worker of this pair.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        if self.error.is_none() {
            self.cancel = cancel;
        }
        self
    }

    fn ensure_ok(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn id_filter(&self) -> Option<Value> {
        if self.ids.is_empty() {
            None
        } else {
            Some(json!({"terms": {"_id": self.ids}}))
        }
    }

    /// Copy the source index's settings/mappings/aliases onto the target
    /// cluster. An existing target is a conflict unless `force` recreates it.
    pub async fn copy_index_settings(&self, force: bool) -> Result<()> {
        self.ensure_ok()?;
        if self.target.exists(&self.pair.target_index).await? {
            if !force {
                return Err(Error::Conflict(format!(
                    "target index {} already exists",
                    self.pair.target_index
                )));
            }
            self.target.delete_index(&self.pair.target_index).await?;
        }
        self.create_target_from_source().await
    }

    /// Stream every source document into the target. Ensures the target
    /// index exists first; an existing target is left alone unless `force`.
    pub async fn sync(&self, force: bool) -> Result<SyncReport> {
        self.ensure_ok()?;
        self.ensure_target_index(force).await?;

        let cancel = self.cancel.child_token();
        let (tx, rx) = async_channel::bounded::<Vec<Doc>>(self.buffer_count);

        let producer = ScrollProducer {
            cluster: Arc::clone(&self.source),
            index: self.pair.source_index.clone(),
            slice_count: self.slice_size,
            scroll_size: self.scroll_size,
            scroll_time: self.scroll_time,
            query: self.id_filter(),
            cancel: cancel.clone(),
        };
        let writers = BulkWriterPool {
            cluster: Arc::clone(&self.target),
            index: self.pair.target_index.clone(),
            write_parallel: self.write_parallel,
            write_size: self.write_size,
        };

        let (produced, written) = tokio::join!(producer.run(tx), writers.run(rx));
        produced?;
        let stats = written?;
        info!(
            pair = %self.pair.key(),
            docs = stats.docs,
            failures = stats.failures,
            "sync finished"
        );
        Ok(SyncReport { docs_written: stats.docs, doc_failures: stats.failures })
    }

    /// Diff both sides and apply the create/update/delete ops to the target,
    /// converging it to the source.
    pub async fn sync_diff(&self) -> Result<DiffResult> {
        self.ensure_ok()?;
        let cancel = self.cancel.child_token();
        let (tx, rx) = async_channel::bounded::<Vec<Doc>>(self.buffer_count);

        let engine = self.diff_engine(cancel.clone());
        let writers = BulkWriterPool {
            cluster: Arc::clone(&self.target),
            index: self.pair.target_index.clone(),
            write_parallel: self.write_parallel,
            write_size: self.write_size,
        };

        let (diffed, written) = tokio::join!(engine.run(Some(tx)), writers.run(rx));
        let result = diffed?;
        written?;
        info!(
            pair = %self.pair.key(),
            created = result.created,
            updated = result.updated,
            deleted = result.deleted,
            equal = result.equal,
            "sync_diff finished"
        );
        Ok(result)
    }

    /// Diff both sides without writing anything.
    pub async fn compare(&self) -> Result<DiffResult> {
        self.ensure_ok()?;
        let engine = self.diff_engine(self.cancel.child_token());
        engine.run(None).await
    }

    fn diff_engine(&self, cancel: CancellationToken) -> DiffEngine {
        DiffEngine {
            source: Arc::clone(&self.source),
            target: Arc::clone(&self.target),
            pair: self.pair.clone(),
            slice_count: self.slice_size,
            scroll_size: self.scroll_size,
            scroll_time: self.scroll_time,
            compare_parallel: self.compare_parallel,
            query: self.id_filter(),
            cancel,
        }
    }

    async fn ensure_target_index(&self, force: bool) -> Result<()> {
        if self.target.exists(&self.pair.target_index).await? {
            if !force {
                return Ok(());
            }
            self.target.delete_index(&self.pair.target_index).await?;
        }
        self.create_target_from_source().await
    }

    async fn create_target_from_source(&self) -> Result<()> {
        let bundle = self
            .source
            .bundle(&self.pair.source_index)
            .await?
            .ok_or_else(|| {
                Error::Config(format!("source index {} does not exist", self.pair.source_index))
            })?;
        let mut translated = translate(&bundle, self.target.family())?;
        translated.index = self.pair.target_index.clone();
        self.target.create_index(&translated).await
    }
}
