//! Bulk writer pool: drain the batch queue into `_bulk` requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::Receiver;
use esbridge_cluster::Cluster;
use esbridge_core::{Doc, Result};
use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::join_failure;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriteStats {
    pub docs: u64,
    /// Per-item bulk failures plus docs lost to failed bulk requests.
    pub failures: u64,
}

pub(crate) struct BulkWriterPool {
    pub cluster: Arc<dyn Cluster>,
    pub index: String,
    pub write_parallel: usize,
    pub write_size: usize,
}

impl BulkWriterPool {
    /// Run `write_parallel` consumers until the queue is closed and drained.
    /// Item failures are logged and counted, never raised; the pool succeeds
    /// when every worker exits cleanly.
    pub async fn run(self, rx: Receiver<Vec<Doc>>) -> Result<WriteStats> {
        let docs = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let mut workers = JoinSet::new();
        for _ in 0..self.write_parallel.max(1) {
            workers.spawn(write_loop(
                Arc::clone(&self.cluster),
                self.index.clone(),
                self.write_size.max(1),
                rx.clone(),
                Arc::clone(&docs),
                Arc::clone(&failures),
            ));
        }

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined.map_err(join_failure) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result.map(|_| WriteStats {
            docs: docs.load(Ordering::Relaxed),
            failures: failures.load(Ordering::Relaxed),
        })
    }
}

async fn write_loop(
    cluster: Arc<dyn Cluster>,
    index: String,
    write_size: usize,
    rx: Receiver<Vec<Doc>>,
    docs: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
) {
    let mut buf = String::new();
    let mut pending = 0usize;

    loop {
        match rx.recv().await {
            Ok(batch) => {
                for doc in batch {
                    cluster.serialize_doc(&index, &doc, &mut buf);
                    pending += 1;
                    if pending >= write_size {
                        flush(&*cluster, &index, &mut buf, &mut pending, &docs, &failures).await;
                    }
                }
                // Nothing else queued right now; don't sit on a partial buffer.
                if rx.is_empty() {
                    flush(&*cluster, &index, &mut buf, &mut pending, &docs, &failures).await;
                }
            }
            Err(_) => {
                flush(&*cluster, &index, &mut buf, &mut pending, &docs, &failures).await;
                debug!(index = %index, "bulk writer finished: queue closed and drained");
                return;
            }
        }
    }
}

async fn flush(
    cluster: &dyn Cluster,
    index: &str,
    buf: &mut String,
    pending: &mut usize,
    docs: &AtomicU64,
    failures: &AtomicU64,
) {
    if *pending == 0 {
        return;
    }
    let body = std::mem::take(buf);
    let count = std::mem::take(pending);

    match cluster.bulk(body).await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(
                    index = %index,
                    id = %failure.id,
                    action = %failure.action,
                    status = failure.status,
                    reason = %failure.reason,
                    "bulk item failed"
                );
            }
            counter!("bulk_item_failures_total", report.failures.len() as u64);
            failures.fetch_add(report.failures.len() as u64, Ordering::Relaxed);
            docs.fetch_add(count as u64, Ordering::Relaxed);
        }
        Err(e) => {
            // A failed request loses this buffer only; the pool keeps going.
            warn!(index = %index, count, error = %e, "bulk request failed");
            counter!("bulk_request_failures_total", 1u64);
            failures.fetch_add(count as u64, Ordering::Relaxed);
        }
    }
}
