//! Across-pair orchestration: resolve pairs from lists or patterns, fan out
//! per-pair migrators under a global concurrency bound, aggregate results.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use esbridge_cluster::Cluster;
use esbridge_core::{DiffResult, Error, IndexPair, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::defaults;
use crate::migrator::Migrator;
use crate::SyncReport;

/// Aggregate outcome of a batch `sync`/`copy_index_settings`: individual
/// pair failures are reported here, they never abort the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    /// Pair identities that failed, with their error messages.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates many index pairs between one source and one target cluster.
/// Same latched-error `with_*` chain as [`Migrator`], plus pair resolution.
#[derive(Clone)]
pub struct BulkMigrator {
    source: Arc<dyn Cluster>,
    target: Arc<dyn Cluster>,
    pairs: HashMap<String, IndexPair>,
    parallelism: usize,
    scroll_size: u32,
    scroll_time: u32,
    slice_size: u32,
    buffer_count: usize,
    write_parallel: usize,
    write_size: usize,
    compare_parallel: usize,
    ids: Vec<String>,
    ignore_system_index: bool,
    cancel: CancellationToken,
    error: Option<Error>,
}

impl BulkMigrator {
    pub fn new(source: Arc<dyn Cluster>, target: Arc<dyn Cluster>) -> Self {
        Self {
            source,
            target,
            pairs: HashMap::new(),
            parallelism: defaults::PARALLELISM,
            scroll_size: defaults::SCROLL_SIZE,
            scroll_time: defaults::SCROLL_TIME,
            slice_size: defaults::SLICE_SIZE,
            buffer_count: defaults::BUFFER_COUNT,
            write_parallel: defaults::WRITE_PARALLEL,
            write_size: defaults::WRITE_SIZE,
            compare_parallel: defaults::COMPARE_PARALLEL,
            ids: Vec::new(),
            ignore_system_index: true,
            cancel: CancellationToken::new(),
            error: None,
        }
    }

    /// Add explicit pairs; duplicates by identity collapse.
    pub fn with_index_pairs(mut self, pairs: impl IntoIterator<Item = IndexPair>) -> Self {
        if self.error.is_some() {
            return self;
        }
        for pair in pairs {
            if pair.source_index.is_empty() || pair.target_index.is_empty() {
                self.error = Some(Error::Config(format!("invalid index pair {:?}", pair)));
                return self;
            }
            self.pairs.entry(pair.key()).or_insert(pair);
        }
        self
    }

    /// Resolve pairs by matching source index names against a regex; every
    /// match maps onto an identically named target index. Names starting
    /// with `.` are skipped while `ignore_system_index` is set.
    pub async fn with_pattern(mut self, pattern: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        let regex = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                self.error = Some(Error::Config(format!("invalid pattern {pattern}: {e}")));
                return self;
            }
        };
        let indexes = match self.source.indexes().await {
            Ok(list) => list,
            Err(e) => {
                self.error = Some(e);
                return self;
            }
        };
        for index in indexes {
            if self.ignore_system_index && index.starts_with('.') {
                continue;
            }
            if regex.is_match(&index) {
                let pair = IndexPair::new(index.clone(), index);
                self.pairs.entry(pair.key()).or_insert(pair);
            }
        }
        self
    }

    pub fn with_ignore_system_index(mut self, ignore: bool) -> Self {
        if self.error.is_none() {
            self.ignore_system_index = ignore;
        }
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        if self.error.is_none() {
            self.parallelism =
                if parallelism == 0 { defaults::PARALLELISM } else { parallelism };
        }
        self
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

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        if self.error.is_none() {
            self.ids = ids;
        }
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        if self.error.is_none() {
            self.cancel = cancel;
        }
        self
    }

    /// The resolved pair identities, for callers that want to inspect them.
    pub fn pair_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.pairs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn sync(&self, force: bool) -> Result<BatchReport> {
        self.run_batch(move |m| async move { m.sync(force).await.map(|_: SyncReport| ()) })
            .await
    }

    pub async fn copy_index_settings(&self, force: bool) -> Result<BatchReport> {
        self.run_batch(move |m| async move { m.copy_index_settings(force).await }).await
    }

    /// Converge every pair; returns the diff results of pairs that had
    /// differences, keyed by pair identity.
    pub async fn sync_diff(&self) -> Result<HashMap<String, DiffResult>> {
        self.run_diffs(|m| async move { m.sync_diff().await }).await
    }

    /// Compare every pair without writing.
    pub async fn compare(&self) -> Result<HashMap<String, DiffResult>> {
        self.run_diffs(|m| async move { m.compare().await }).await
    }

    async fn run_batch<F, Fut>(&self, op: F) -> Result<BatchReport>
    where
        F: Fn(Migrator) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let outcomes = self.for_each_pair(op).await?;
        let mut report = BatchReport { total: outcomes.len(), failed: Vec::new() };
        for (key, outcome) in outcomes {
            if let Err(e) = outcome {
                report.failed.push((key, e.to_string()));
            }
        }
        Ok(report)
    }

    async fn run_diffs<F, Fut>(&self, op: F) -> Result<HashMap<String, DiffResult>>
    where
        F: Fn(Migrator) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<DiffResult>> + Send + 'static,
    {
        let outcomes = self.for_each_pair(op).await?;
        let mut results = HashMap::new();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(diff) if diff.has_diff() => {
                    results.insert(key, diff);
                }
                Ok(_) => info!(pair = %key, "no difference"),
                Err(e) => error!(pair = %key, error = %e, "pair failed"),
            }
        }
        Ok(results)
    }

    async fn for_each_pair<T, F, Fut>(&self, op: F) -> Result<Vec<(String, Result<T>)>>
    where
        T: Send + 'static,
        F: Fn(Migrator) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let total = self.pairs.len();
        let permits = Arc::new(Semaphore::new(self.parallelism.max(1)));
        let finished = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for pair in self.pairs.values().cloned() {
            let op = op.clone();
            let permits = Arc::clone(&permits);
            let finished = Arc::clone(&finished);
            let migrator = self.migrator_for(pair.clone());
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (pair.key(), Err(Error::Cancelled));
                };
                let outcome = op(migrator).await;
                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                info!(finished = done, total, "task progress");
                (pair.key(), outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => outcomes.push(entry),
                // A panicked pair degrades to one failure entry below;
                // sibling results already collected are kept.
                Err(e) => warn!(error = %e, "pair task failed before reporting"),
            }
        }
        if outcomes.len() < total {
            let missing: Vec<String> = {
                let reported: HashSet<&str> =
                    outcomes.iter().map(|(key, _)| key.as_str()).collect();
                self.pairs
                    .keys()
                    .filter(|key| !reported.contains(key.as_str()))
                    .cloned()
                    .collect()
            };
            for key in missing {
                outcomes.push((
                    key,
                    Err(Error::Transport("pair task panicked or was aborted".into())),
                ));
            }
        }
        Ok(outcomes)
    }

    fn migrator_for(&self, pair: IndexPair) -> Migrator {
        Migrator::new(Arc::clone(&self.source), Arc::clone(&self.target), pair)
            .with_scroll_size(self.scroll_size)
            .with_scroll_time(self.scroll_time)
            .with_slice_size(self.slice_size)
            .with_buffer_count(self.buffer_count)
            .with_write_parallel(self.write_parallel)
            .with_write_size(self.write_size)
            .with_compare_parallel(self.compare_parallel)
            .with_ids(self.ids.clone())
            .with_cancellation(self.cancel.child_token())
    }
}
