//! Amazon SNS dialect. Unbuffered: every event is published as its own
//! JSON message, so failed saves go through the requeue path.

use super::aws::load_sdk_config;
use super::convert::{BatchConverter, Converter, convert_json};
use super::StorageClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_sns::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// `[sns]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsConfig {
    pub topic_arn: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SnsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.topic_arn.is_empty() {
            return Err(Error::Config("[sns] needs `topic_arn`".to_string()));
        }
        Ok(())
    }
}

pub struct SnsStorage {
    client: Client,
    topic_arn: String,
}

impl SnsStorage {
    pub async fn connect(config: &SnsConfig) -> Result<Self> {
        config.validate()?;
        let shared_config =
            load_sdk_config(config.region.as_deref(), config.endpoint.as_deref()).await;

        info!(topic = %config.topic_arn, "sns storage ready");
        Ok(Self {
            client: Client::new(&shared_config),
            topic_arn: config.topic_arn.clone(),
        })
    }
}

/// SNS messages are text; drop the record terminator the converter adds.
fn message_body(payload: Vec<u8>) -> Result<String> {
    let mut message = String::from_utf8(payload)
        .map_err(|e| Error::Convert(format!("event is not valid UTF-8: {e}")))?;
    if message.ends_with('\n') {
        message.pop();
    }
    Ok(message)
}

#[async_trait]
impl StorageClient for SnsStorage {
    fn name(&self) -> &str {
        "sns"
    }

    fn is_buffered_storage(&self) -> bool {
        false
    }

    fn converter(&self) -> Option<Converter> {
        Some(convert_json)
    }

    fn batch_converter(&self) -> Option<BatchConverter> {
        None
    }

    async fn save(&self, payload: Vec<u8>) -> Result<()> {
        let message = message_body(payload)?;
        let output = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message)
            .send()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;
        debug!(message_id = output.message_id().unwrap_or_default(), "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_topic() {
        let config = SnsConfig {
            topic_arn: "arn:aws:sns:eu-west-1:123456789012:events".to_string(),
            region: None,
            endpoint: None,
        };
        assert!(config.validate().is_ok());

        let missing = SnsConfig {
            topic_arn: String::new(),
            ..config
        };
        assert!(missing.validate().is_err());
    }

    #[test]
    fn message_body_strips_record_terminator() {
        assert_eq!(message_body(b"{\"a\":1}\n".to_vec()).unwrap(), "{\"a\":1}");
        assert_eq!(message_body(b"{}".to_vec()).unwrap(), "{}");
        assert!(message_body(vec![0xff, 0xfe]).is_err());
    }
}
