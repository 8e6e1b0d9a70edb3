use thiserror::Error;

/// Errors raised by the handoff buffers and the pipeline configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[error("request of {requested} exceeds ring capacity of {capacity}")]
    RequestExceedsCapacity { requested: usize, capacity: usize },
    #[error("the other side of the buffer has gone away")]
    Disconnected,
    #[error("timed out waiting on the buffer")]
    Timeout,
    #[error("the {0} endpoint of this buffer was already claimed")]
    RoleClaimed(&'static str),
    #[error("pipeline is not in a state that allows this operation: {0}")]
    InvalidState(&'static str),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
