//! Diff engine: co-scroll both sides of a pair with matching slice and sort,
//! merge-walk by ID, and classify every document as create/update/delete/equal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::Sender;
use esbridge_cluster::Cluster;
use esbridge_core::{
    same_json, DiffResult, Doc, Error, IndexPair, Operation, Result, ScrollOption, ScrollResult,
    DIFF_SAMPLE_LIMIT,
};
use metrics::counter;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::join_failure;

/// Shared counters for one diff run. Counters are atomics; the bounded ID
/// samples sit behind a mutex that is never held across an await.
#[derive(Default)]
struct DiffTally {
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    equal: AtomicU64,
    samples: Mutex<Samples>,
}

#[derive(Default)]
struct Samples {
    created: Vec<String>,
    updated: Vec<String>,
    deleted: Vec<String>,
}

impl DiffTally {
    fn record(&self, op: Operation, id: &str) {
        let (cell, label) = match op {
            Operation::Create => (&self.created, "create"),
            Operation::Update => (&self.updated, "update"),
            Operation::Delete => (&self.deleted, "delete"),
        };
        cell.fetch_add(1, Ordering::Relaxed);
        counter!("diff_ops_total", 1u64, "op" => label);

        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = match op {
            Operation::Create => &mut samples.created,
            Operation::Update => &mut samples.updated,
            Operation::Delete => &mut samples.deleted,
        };
        if bucket.len() < DIFF_SAMPLE_LIMIT {
            bucket.push(id.to_string());
        }
    }

    fn record_equal(&self) {
        self.equal.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DiffResult {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        DiffResult {
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            equal: self.equal.load(Ordering::Relaxed),
            created_ids: samples.created.clone(),
            updated_ids: samples.updated.clone(),
            deleted_ids: samples.deleted.clone(),
        }
    }
}

pub(crate) struct DiffEngine {
    pub source: Arc<dyn Cluster>,
    pub target: Arc<dyn Cluster>,
    pub pair: IndexPair,
    pub slice_count: u32,
    pub scroll_size: u32,
    pub scroll_time: u32,
    pub compare_parallel: usize,
    pub query: Option<Value>,
    pub cancel: CancellationToken,
}

impl DiffEngine {
    /// Walk every slice and return the merged tally. With a sink, ops are
    /// also emitted for the bulk writer pool; the sink is closed when the
    /// engine finishes, on every path.
    pub async fn run(self, sink: Option<Sender<Vec<Doc>>>) -> Result<DiffResult> {
        let tally = Arc::new(DiffTally::default());

        // Slice feed: compare_parallel workers drain the slice assignments.
        let (feed_tx, feed_rx) = async_channel::unbounded::<ScrollOption>();
        for option in self.slice_options() {
            let _ = feed_tx.try_send(option);
        }
        feed_tx.close();

        let mut workers = JoinSet::new();
        for _ in 0..self.compare_parallel.max(1) {
            let source = Arc::clone(&self.source);
            let target = Arc::clone(&self.target);
            let pair = self.pair.clone();
            let feed = feed_rx.clone();
            let tally = Arc::clone(&tally);
            let sink = sink.clone();
            let cancel = self.cancel.clone();
            let batch = self.scroll_size.max(1) as usize;
            workers.spawn(async move {
                while let Ok(option) = feed.recv().await {
                    diff_slice(&source, &target, &pair, &option, &tally, sink.as_ref(), &cancel, batch)
                        .await?;
                }
                Ok(())
            });
        }

        let mut result: Result<()> = Ok(());
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(join_failure).and_then(|r| r);
            if let Err(e) = outcome {
                warn!(pair = %self.pair.key(), error = %e, "diff worker failed");
                if result.is_ok() {
                    result = Err(e);
                }
                self.cancel.cancel();
            }
        }
        if let Some(sink) = sink {
            sink.close();
        }
        result.map(|_| tally.snapshot())
    }

    fn slice_options(&self) -> Vec<ScrollOption> {
        // Identical sort on both sides is what makes the merge-walk valid.
        let base = ScrollOption {
            scroll_size: self.scroll_size,
            scroll_time: self.scroll_time,
            slice_id: None,
            slice_count: None,
            query: self.query.clone(),
            sort_fields: vec!["_id".to_string()],
        };
        if self.slice_count >= 2 {
            (0..self.slice_count)
                .map(|id| ScrollOption {
                    slice_id: Some(id),
                    slice_count: Some(self.slice_count),
                    ..base.clone()
                })
                .collect()
        } else {
            vec![base]
        }
    }
}

/// An ID-ordered pull cursor over one side's scroll.
struct DocStream {
    cluster: Arc<dyn Cluster>,
    scroll_time: u32,
    scroll_id: String,
    page: std::vec::IntoIter<Doc>,
    done: bool,
}

impl DocStream {
    async fn open(cluster: Arc<dyn Cluster>, index: &str, option: &ScrollOption) -> Result<Self> {
        let first: ScrollResult = cluster.open_scroll(index, option).await?;
        Ok(Self {
            cluster,
            scroll_time: option.scroll_time,
            scroll_id: first.scroll_id.clone(),
            done: first.docs.is_empty(),
            page: first.docs.into_iter(),
        })
    }

    async fn next(&mut self) -> Result<Option<Doc>> {
        loop {
            if let Some(doc) = self.page.next() {
                return Ok(Some(doc));
            }
            if self.done {
                return Ok(None);
            }
            let page = self.cluster.next_scroll(&self.scroll_id, self.scroll_time).await?;
            self.scroll_id = page.scroll_id;
            self.done = page.docs.is_empty();
            self.page = page.docs.into_iter();
        }
    }

    async fn clear(self) {
        if let Err(e) = self.cluster.clear_scroll(&self.scroll_id).await {
            warn!(error = %e, "clear scroll failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn diff_slice(
    source: &Arc<dyn Cluster>,
    target: &Arc<dyn Cluster>,
    pair: &IndexPair,
    option: &ScrollOption,
    tally: &DiffTally,
    sink: Option<&Sender<Vec<Doc>>>,
    cancel: &CancellationToken,
    batch: usize,
) -> Result<()> {
    let src = DocStream::open(Arc::clone(source), &pair.source_index, option).await?;
    let dst = match DocStream::open(Arc::clone(target), &pair.target_index, option).await {
        Ok(stream) => stream,
        Err(e) => {
            // The other side's cursor still has to go away.
            src.clear().await;
            return Err(e);
        }
    };

    let mut src = src;
    let mut dst = dst;
    let walk = merge_walk(&mut src, &mut dst, tally, sink, cancel, batch).await;
    src.clear().await;
    dst.clear().await;
    walk
}

/// Merge two ID-sorted streams, classifying each document.
async fn merge_walk(
    src: &mut DocStream,
    dst: &mut DocStream,
    tally: &DiffTally,
    sink: Option<&Sender<Vec<Doc>>>,
    cancel: &CancellationToken,
    batch: usize,
) -> Result<()> {
    let mut ops: Vec<Doc> = Vec::new();
    let mut left = src.next().await?;
    let mut right = dst.next().await?;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match (left.take(), right.take()) {
            (None, None) => break,
            (Some(s), None) => {
                push_op(&mut ops, tally, sink.is_some(), with_op(s, Operation::Create));
                left = src.next().await?;
            }
            (None, Some(t)) => {
                push_op(&mut ops, tally, sink.is_some(), delete_of(&t));
                right = dst.next().await?;
            }
            (Some(s), Some(t)) => {
                if s.id < t.id {
                    push_op(&mut ops, tally, sink.is_some(), with_op(s, Operation::Create));
                    right = Some(t);
                    left = src.next().await?;
                } else if s.id > t.id {
                    push_op(&mut ops, tally, sink.is_some(), delete_of(&t));
                    left = Some(s);
                    right = dst.next().await?;
                } else {
                    if same_json(&s.source, &t.source) {
                        tally.record_equal();
                    } else {
                        push_op(&mut ops, tally, sink.is_some(), with_op(s, Operation::Update));
                    }
                    left = src.next().await?;
                    right = dst.next().await?;
                }
            }
        }
        if ops.len() >= batch {
            send_ops(sink, &mut ops, cancel).await?;
        }
    }
    send_ops(sink, &mut ops, cancel).await
}

fn with_op(mut doc: Doc, op: Operation) -> Doc {
    doc.op = op;
    doc
}

fn delete_of(target_doc: &Doc) -> Doc {
    Doc {
        id: target_doc.id.clone(),
        doc_type: target_doc.doc_type.clone(),
        source: Value::Null,
        op: Operation::Delete,
    }
}

fn push_op(ops: &mut Vec<Doc>, tally: &DiffTally, keep: bool, doc: Doc) {
    tally.record(doc.op, &doc.id);
    if keep {
        ops.push(doc);
    }
}

async fn send_ops(
    sink: Option<&Sender<Vec<Doc>>>,
    ops: &mut Vec<Doc>,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(sink) = sink else {
        ops.clear();
        return Ok(());
    };
    if ops.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(ops);
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = sink.send(batch) => sent.map_err(|_| Error::Cancelled),
    }
}
