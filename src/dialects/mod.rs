//! Storage dialects: where accepted events end up.
//!
//! Every backend exposes the same small capability surface ([`StorageClient`]):
//! whether it wants batches, the matching converter, and `save`. The set of
//! built-in backends is closed and picked once from configuration.

mod aws;
pub mod compress;
pub mod convert;
pub mod file;
pub mod path;
pub mod s3;
pub mod sns;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use convert::{BatchConverter, Converter};

/// A durable destination for serialized events.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Batch-saving backend (`true`) or one-save-per-event (`false`).
    fn is_buffered_storage(&self) -> bool;

    /// Present iff the backend is not buffered.
    fn converter(&self) -> Option<Converter>;

    /// Present iff the backend is buffered.
    fn batch_converter(&self) -> Option<BatchConverter>;

    /// Persist one serialized unit. Every error is treated as retryable.
    async fn save(&self, payload: Vec<u8>) -> Result<()>;
}

/// The built-in dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    File,
    S3,
    Sns,
}

/// Case-insensitive dialect lookup.
pub fn parse_dialect(name: &str) -> Result<DialectKind> {
    match name.to_ascii_lowercase().as_str() {
        "file" => Ok(DialectKind::File),
        "s3" => Ok(DialectKind::S3),
        "sns" => Ok(DialectKind::Sns),
        _ => Err(Error::Config(format!(
            "not supported `{name}` dialect in the configuration file"
        ))),
    }
}

/// Build the storage client the configuration selects.
pub async fn connect(config: &Config) -> Result<Arc<dyn StorageClient>> {
    match config.dialect_kind()? {
        DialectKind::File => {
            let cfg = config
                .file
                .as_ref()
                .ok_or_else(|| Error::Config("missing [file] section".to_string()))?;
            Ok(Arc::new(file::FileStorage::new(cfg)?))
        }
        DialectKind::S3 => {
            let cfg = config
                .s3
                .as_ref()
                .ok_or_else(|| Error::Config("missing [s3] section".to_string()))?;
            Ok(Arc::new(s3::S3Storage::connect(cfg).await?))
        }
        DialectKind::Sns => {
            let cfg = config
                .sns
                .as_ref()
                .ok_or_else(|| Error::Config("missing [sns] section".to_string()))?;
            Ok(Arc::new(sns::SnsStorage::connect(cfg).await?))
        }
    }
}
