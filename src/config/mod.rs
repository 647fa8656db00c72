//! Typed configuration from a TOML file plus `HAMUSTRO_*` environment overrides.
//!
//! Loads once at startup; `validate` fails fast on missing settings.
//! Secrets are wrapped in `secrecy::SecretString`.

pub mod secrets;

use crate::dialects::file::FileConfig;
use crate::dialects::s3::S3Config;
use crate::dialects::sns::SnsConfig;
use crate::dialects::{self, DialectKind};
use crate::engine::{DispatcherConfig, WorkerOptions};
use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the config file path when `--config` is not given.
pub const CONFIG_PATH_VAR: &str = "HAMUSTRO_CONFIG";

const DEFAULT_RETRY_ATTEMPT: u32 = 3;

/// On-disk shape of the config file. Secrets are plain strings here and
/// get wrapped before anything else can see them.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    dialect: String,
    #[serde(default)]
    shared_secret: Option<String>,
    #[serde(default)]
    maintenance_key: Option<String>,
    #[serde(default)]
    max_worker_size: usize,
    #[serde(default)]
    max_queue_size: usize,
    #[serde(default)]
    buffer_size: usize,
    #[serde(default)]
    spread_buffer_size: bool,
    #[serde(default)]
    retry_attempt: u32,
    #[serde(default)]
    auto_flush_interval: u64,
    #[serde(default)]
    masked_ip: bool,
    #[serde(default = "default_signature")]
    signature: bool,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    otel_endpoint: Option<String>,
    #[serde(default)]
    file: Option<FileConfig>,
    #[serde(default)]
    s3: Option<S3Config>,
    #[serde(default)]
    sns: Option<SnsConfig>,
}

fn default_signature() -> bool {
    true
}

/// Application configuration.
#[derive(Debug)]
pub struct Config {
    pub dialect: String,
    pub shared_secret: SecretString,
    pub maintenance_key: Option<SecretString>,
    pub max_worker_size: usize,
    pub max_queue_size: usize,
    pub buffer_size: usize,
    pub spread_buffer_size: bool,
    pub retry_attempt: u32,
    /// Seconds between automatic flushes. Zero disables them.
    pub auto_flush_interval: u64,
    pub masked_ip: bool,
    pub signature: bool,
    pub log_level: String,
    pub otel_endpoint: Option<String>,
    pub file: Option<FileConfig>,
    pub s3: Option<S3Config>,
    pub sns: Option<SnsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig {
            signature: true,
            ..RawConfig::default()
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let log_level = raw
            .log_level
            .or_else(|| std::env::var("LOG_LEVEL").ok())
            .unwrap_or_else(|| "info".to_string());
        let otel_endpoint = raw
            .otel_endpoint
            .or_else(|| std::env::var("OTEL_ENDPOINT").ok());

        Self {
            dialect: raw.dialect,
            shared_secret: SecretString::from(raw.shared_secret.unwrap_or_default()),
            maintenance_key: raw
                .maintenance_key
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            max_worker_size: raw.max_worker_size,
            max_queue_size: raw.max_queue_size,
            buffer_size: raw.buffer_size,
            spread_buffer_size: raw.spread_buffer_size,
            retry_attempt: raw.retry_attempt,
            auto_flush_interval: raw.auto_flush_interval,
            masked_ip: raw.masked_ip,
            signature: raw.signature,
            log_level,
            otel_endpoint,
            file: raw.file,
            s3: raw.s3,
            sns: raw.sns,
        }
    }

    /// Check that the configuration can actually drive a gateway.
    pub fn validate(&self) -> Result<()> {
        if self.dialect.is_empty() || self.shared_secret.expose_secret().is_empty() {
            return Err(Error::Config(
                "config is incomplete, please define `dialect` and `shared_secret`".to_string(),
            ));
        }
        match self.dialect_kind()? {
            DialectKind::File => {
                let file = self
                    .file
                    .as_ref()
                    .ok_or_else(|| Error::Config("missing [file] section".to_string()))?;
                file.validate()
            }
            DialectKind::S3 => {
                let s3 = self
                    .s3
                    .as_ref()
                    .ok_or_else(|| Error::Config("missing [s3] section".to_string()))?;
                s3.validate()
            }
            DialectKind::Sns => {
                let sns = self
                    .sns
                    .as_ref()
                    .ok_or_else(|| Error::Config("missing [sns] section".to_string()))?;
                sns.validate()
            }
        }
    }

    /// The selected storage dialect.
    pub fn dialect_kind(&self) -> Result<DialectKind> {
        dialects::parse_dialect(&self.dialect)
    }

    /// Number of workers: env override, then file, then CPUs + 1.
    pub fn max_worker_size(&self) -> usize {
        if let Some(size) = env_override("HAMUSTRO_MAX_WORKER_SIZE") {
            return size;
        }
        if self.max_worker_size != 0 {
            return self.max_worker_size;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            + 1
    }

    /// Job queue capacity: env override, then file, then 20 per worker.
    pub fn max_queue_size(&self) -> usize {
        if let Some(size) = env_override("HAMUSTRO_MAX_QUEUE_SIZE") {
            return size;
        }
        if self.max_queue_size != 0 {
            return self.max_queue_size;
        }
        self.max_worker_size() * 20
    }

    /// Base buffer size for buffered storage.
    pub fn buffer_size(&self) -> usize {
        if self.buffer_size != 0 {
            return self.buffer_size;
        }
        self.max_worker_size() * self.max_queue_size() * 10
    }

    pub fn retry_attempt(&self) -> u32 {
        if self.retry_attempt != 0 {
            return self.retry_attempt;
        }
        DEFAULT_RETRY_ATTEMPT
    }

    /// Interval between automatic flushes, `None` when disabled.
    pub fn auto_flush_interval(&self) -> Option<Duration> {
        (self.auto_flush_interval != 0).then(|| Duration::from_secs(self.auto_flush_interval))
    }

    pub fn host(&self) -> String {
        std::env::var("HAMUSTRO_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn port(&self) -> String {
        std::env::var("HAMUSTRO_PORT")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "8080".to_string())
    }

    /// `host:port` the HTTP server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// Options shared by every worker the dispatcher creates.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            buffer_size: self.buffer_size(),
            retry_attempt: self.retry_attempt(),
            spread_buffer: self.spread_buffer_size,
        }
    }

    /// Pool shape and flush policy for the dispatcher.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.max_worker_size(),
            worker: self.worker_options(),
            auto_flush_interval: self.auto_flush_interval(),
        }
    }
}

fn env_override(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|size| *size != 0)
}
