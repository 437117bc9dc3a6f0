//! Sync service configuration

use anyhow::{Context, Result};
use prism_client::ClientConfig;

/// Sync service configuration, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Target bucket for mirrored objects
    pub s3_bucket: String,
    /// Custom S3 endpoint (R2, MinIO); empty uses the default resolver
    pub s3_endpoint: Option<String>,
    /// S3 region
    pub s3_region: String,
    /// Static S3 credentials
    pub s3_key: String,
    pub s3_secret: String,
    /// Object key prefix inside the bucket
    pub s3_prefix: String,
    /// Change-notification webhook URL; unset disables publishing
    pub notify_url: Option<String>,
    /// Seconds between sync cycles
    pub sync_interval: u64,
    /// Protocol client configuration
    pub client: ClientConfig,
}

impl Config {
    fn require(name: &str) -> Result<String> {
        std::env::var(name).with_context(|| format!("{name} must be set"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut client = ClientConfig::new(
            Self::require("GAME_API_BASE")?,
            Self::require("GAME_ISSUE_BASE")?,
            Self::require("GAME_VERSION_INDEX_URL")?,
            Self::require("GAME_VERSION_BASE")?,
            Self::require("GAME_ASSET_DOMAIN")?,
            Self::require("GAME_AES_KEY")?.into_bytes(),
            Self::require("GAME_AES_IV")?.into_bytes(),
        );
        if let Some(platform) = std::env::var("GAME_PLATFORM").ok().filter(|s| !s.is_empty()) {
            client = client.with_platform(platform);
        }
        if let Some(timeout) = std::env::var("GAME_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            client = client.with_timeout(timeout);
        }

        Ok(Self {
            s3_bucket: Self::require("S3_BUCKET")?,
            s3_endpoint: std::env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            s3_region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            s3_key: Self::require("S3_KEY")?,
            s3_secret: Self::require("S3_SECRET")?,
            s3_prefix: std::env::var("S3_PATH").unwrap_or_else(|_| "mirror".into()),
            notify_url: std::env::var("NOTIFY_URL").ok().filter(|s| !s.is_empty()),
            sync_interval: std::env::var("SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            client,
        })
    }
}
