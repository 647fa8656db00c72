//! S3 (and S3-compatible) object storage dialect. Buffered: one gzipped
//! object per batch.
//!
//! Credentials come from the standard AWS provider chain (env, profile,
//! instance metadata). `endpoint` and `force_path_style` cover MinIO and
//! similar stores.

use super::aws::load_sdk_config;
use super::compress::{extension, gzip};
use super::convert::{self, BatchConverter, Converter};
use super::path::random_path;
use super::StorageClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use serde::Deserialize;
use tracing::{debug, info};

/// `[s3]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix; `{date}` expands to the current UTC date.
    #[serde(default)]
    pub blob_path: String,
    pub file_format: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() || self.file_format.is_empty() {
            return Err(Error::Config(
                "[s3] needs `bucket` and `file_format`".to_string(),
            ));
        }
        convert::batch_converter_for(&self.file_format).map(|_| ())
    }
}

pub struct S3Storage {
    client: Client,
    bucket: String,
    blob_path: String,
    file_format: String,
    batch_converter: BatchConverter,
}

impl S3Storage {
    /// Resolve AWS configuration and build the client.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        config.validate()?;

        let shared_config =
            load_sdk_config(config.region.as_deref(), config.endpoint.as_deref()).await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_builder.build());

        info!(bucket = %config.bucket, "s3 storage ready");
        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            blob_path: config.blob_path.clone(),
            file_format: config.file_format.clone(),
            batch_converter: convert::batch_converter_for(&config.file_format)?,
        })
    }

}

#[async_trait]
impl StorageClient for S3Storage {
    fn name(&self) -> &str {
        "s3"
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
        let key = random_path(&self.blob_path, &extension(&self.file_format, true));
        let body = gzip(&payload)?;
        let bytes = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/gzip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;
        debug!(bucket = %self.bucket, key = %key, bytes, "batch uploaded");
        Ok(())
    }
}
