//! Migration engine: sliced scroll producers, parallel bulk writers, the
//! diff/convergence walk, and the per-pair and across-pair orchestrators.

#![forbid(unsafe_code)]

mod bulk_migrator;
mod diff;
mod migrator;
mod producer;
mod writer;

pub use bulk_migrator::{BatchReport, BulkMigrator};
pub use migrator::{Migrator, SyncReport};

/// Recognized option defaults; a zero value always collapses to these.
pub mod defaults {
    /// Across-pair concurrency.
    pub const PARALLELISM: usize = 8;
    /// Documents per scroll page.
    pub const SCROLL_SIZE: u32 = 1000;
    /// Scroll TTL in minutes.
    pub const SCROLL_TIME: u32 = 5;
    /// Slices per scroll.
    pub const SLICE_SIZE: u32 = 1;
    /// Bounded queue capacity, in batches.
    pub const BUFFER_COUNT: usize = 4;
    /// Bulk writer workers per pair.
    pub const WRITE_PARALLEL: usize = 4;
    /// Documents per bulk request.
    pub const WRITE_SIZE: usize = 1000;
    /// Parallel diff workers per pair.
    pub const COMPARE_PARALLEL: usize = 4;
}

pub(crate) fn join_failure(e: tokio::task::JoinError) -> esbridge_core::Error {
    esbridge_core::Error::Transport(format!("worker task failed: {e}"))
}
