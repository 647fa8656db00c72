//! Shared AWS SDK configuration for the AWS-backed dialects.

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Resolve credentials from the default provider chain, with optional
/// region and endpoint overrides (for S3/SNS-compatible services).
pub(crate) async fn load_sdk_config(region: Option<&str>, endpoint: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint) = endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}
