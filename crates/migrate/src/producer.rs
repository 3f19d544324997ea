//! Scroll producer: N sliced scroll workers feeding one bounded batch queue.

use std::sync::Arc;

use async_channel::Sender;
use esbridge_cluster::Cluster;
use esbridge_core::{Doc, Error, Operation, Result, ScrollOption, ScrollResult};
use metrics::counter;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::join_failure;

pub(crate) struct ScrollProducer {
    pub cluster: Arc<dyn Cluster>,
    pub index: String,
    pub slice_count: u32,
    pub scroll_size: u32,
    pub scroll_time: u32,
    pub query: Option<Value>,
    pub cancel: CancellationToken,
}

impl ScrollProducer {
    /// Run all slice workers to completion, then close the queue. The queue
    /// is closed on every exit path so consumers never wait forever.
    pub async fn run(self, tx: Sender<Vec<Doc>>) -> Result<()> {
        let mut workers = JoinSet::new();
        for option in self.slice_options() {
            let cluster = Arc::clone(&self.cluster);
            let index = self.index.clone();
            let tx = tx.clone();
            let cancel = self.cancel.clone();
            workers.spawn(run_slice(cluster, index, option, tx, cancel));
        }

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(join_failure).and_then(|r| r);
            if let Err(e) = outcome {
                warn!(index = %self.index, error = %e, "scroll worker failed");
                if result.is_ok() {
                    result = Err(e);
                }
                // One failed slice aborts the pair; stop the siblings.
                self.cancel.cancel();
            }
        }
        tx.close();
        result
    }

    fn slice_options(&self) -> Vec<ScrollOption> {
        let base = ScrollOption {
            scroll_size: self.scroll_size,
            scroll_time: self.scroll_time,
            slice_id: None,
            slice_count: None,
            query: self.query.clone(),
            sort_fields: Vec::new(),
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

async fn run_slice(
    cluster: Arc<dyn Cluster>,
    index: String,
    option: ScrollOption,
    tx: Sender<Vec<Doc>>,
    cancel: CancellationToken,
) -> Result<()> {
    let first = cluster.open_scroll(&index, &option).await?;
    let mut scroll_id = first.scroll_id.clone();
    debug!(index = %index, slice = ?option.slice_id, total = first.total, "scroll opened");

    let result = pump(&*cluster, option.scroll_time, first, &mut scroll_id, &tx, &cancel).await;

    if let Err(e) = cluster.clear_scroll(&scroll_id).await {
        warn!(index = %index, error = %e, "clear scroll failed");
    }
    result
}

/// Page loop for one slice: tag, enqueue (with backpressure), fetch next.
/// Every blocking point races the cancellation token.
async fn pump(
    cluster: &dyn Cluster,
    scroll_time: u32,
    first: ScrollResult,
    scroll_id: &mut String,
    tx: &Sender<Vec<Doc>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut page = first;
    loop {
        if page.docs.is_empty() {
            return Ok(());
        }

        let mut batch = std::mem::take(&mut page.docs);
        for doc in &mut batch {
            doc.op = Operation::Create;
        }
        counter!("scroll_docs_total", batch.len() as u64);

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = tx.send(batch) => {
                // A closed queue means all consumers are gone; stop quietly.
                if sent.is_err() {
                    return Ok(());
                }
            }
        }

        page = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = cluster.next_scroll(scroll_id, scroll_time) => next?,
        };
        *scroll_id = page.scroll_id.clone();
    }
}
