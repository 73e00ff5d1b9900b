//! Error types for svdsteg.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A worker answered with a response the pending handler did not expect.
    #[error("Protocol error: expected '{expected}' response from worker, got '{got}'")]
    Protocol {
        expected: &'static str,
        got: &'static str,
    },

    /// The request was preempted by a newer one on the same channel.
    #[error("Request superseded by a newer request")]
    Superseded,

    #[error("Engine failed to load: {0}")]
    EngineLoad(String),

    #[error("Worker error: {0}")]
    Worker(String),

    /// The engine noticed its cancel token and gave up.
    #[error("Computation cancelled")]
    Cancelled,

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error only means a newer request took over.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
