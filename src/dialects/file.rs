//! Local filesystem dialect. Buffered: one new file per batch, optionally gzipped.

use super::compress::{extension, gzip};
use super::convert::{self, BatchConverter, Converter};
use super::path::{random_path, resolve_path};
use super::StorageClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// `[file]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Target directory; `{date}` expands to the current UTC date.
    pub file_path: String,
    /// `json` or `csv`.
    pub file_format: String,
    /// Gzip each batch and add `.gz` to the file name.
    #[serde(default)]
    pub compress: bool,
}

impl FileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_path.is_empty() || self.file_format.is_empty() {
            return Err(Error::Config(
                "[file] needs `file_path` and `file_format`".to_string(),
            ));
        }
        convert::batch_converter_for(&self.file_format).map(|_| ())
    }
}

pub struct FileStorage {
    file_path: String,
    file_format: String,
    compress: bool,
    batch_converter: BatchConverter,
}

impl FileStorage {
    pub fn new(config: &FileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            file_path: config.file_path.clone(),
            file_format: config.file_format.clone(),
            compress: config.compress,
            batch_converter: convert::batch_converter_for(&config.file_format)?,
        })
    }
}

#[async_trait]
impl StorageClient for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    fn is_buffered_storage(&self) -> bool {
        true
    }

    fn converter(&self) -> Option<Converter> {
        None
    }

    fn batch_converter(&self) -> Option<BatchConverter> {
        Some(self.batch_converter)
    }

    async fn save(&self, payload: Vec<u8>) -> Result<()> {
        let dir = resolve_path(&self.file_path);
        tokio::fs::create_dir_all(&dir).await?;

        let payload = if self.compress { gzip(&payload)? } else { payload };
        let path = random_path(&dir, &extension(&self.file_format, self.compress));
        tokio::fs::write(&path, &payload).await?;
        debug!(path = %path, bytes = payload.len(), compressed = self.compress, "batch written");
        Ok(())
    }
}
