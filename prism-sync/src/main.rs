//! prism-sync — periodic game-data mirror
//!
//! Long-running service that:
//! - Registers a game account and keeps its session alive
//! - Mirrors key/value game data and asset bundles into an object store
//! - Publishes a change event for every object that actually changed

mod config;
mod mirror;
mod notify;
mod pipeline;

use std::sync::Arc;

use anyhow::Result;
use aws_sdk_s3::config::{Credentials, Region};
use prism_client::GameClient;

use config::Config;
use mirror::{Mirror, S3Store};
use notify::WebhookNotifier;
use pipeline::SyncPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism_sync=info,prism_client=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(bucket = %config.s3_bucket, "starting prism-sync");

    let s3 = build_s3_client(&config).await;
    let store = Arc::new(S3Store::new(s3, config.s3_bucket.clone()));
    let mirror = Mirror::new(store, config.s3_bucket.clone(), config.s3_prefix.clone());
    let notifier = Arc::new(WebhookNotifier::new(config.notify_url.clone()));

    let client = GameClient::new(config.client.clone())?;
    client.register().await?;

    let pipeline = Arc::new(SyncPipeline::new(client, mirror, notifier));

    // Periodic trigger; overlapping ticks are dropped by the cycle guard
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.sync_interval));
    loop {
        interval.tick().await;
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_cycle().await {
                tracing::error!("sync cycle failed: {e:#}");
            }
        });
    }
}

async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        config.s3_key.clone(),
        config.s3_secret.clone(),
        None,
        None,
        "prism-sync",
    );

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint.clone());
    }

    aws_sdk_s3::Client::new(&loader.load().await)
}
