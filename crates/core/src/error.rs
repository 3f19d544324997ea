//! Error kinds shared across the workspace, suitable for transport to callers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    /// Invalid index pair, invalid pattern, missing cluster.
    #[error("config: {0}")]
    Config(String),

    /// Network failure reaching a cluster.
    #[error("transport: {0}")]
    Transport(String),

    /// Non-2xx response from a cluster.
    #[error("cluster error (status {status}): {message}")]
    Cluster { status: u16, index: Option<String>, message: String },

    /// Unrecognized mapping shape during settings translation.
    #[error("translation: {0}")]
    Translation(String),

    /// Target index exists when it must not.
    #[error("conflict: {0}")]
    Conflict(String),

    /// External cancellation.
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn cluster(status: u16, index: Option<&str>, message: impl Into<String>) -> Self {
        Error::Cluster { status, index: index.map(str::to_string), message: message.into() }
    }
}
