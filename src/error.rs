//! Error types for hamustro.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("converting events failed: {0}")]
    Convert(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("job queue is closed")]
    QueueClosed,

    #[error("shutdown did not finish within {}s", .0.as_secs())]
    ShutdownTimeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
