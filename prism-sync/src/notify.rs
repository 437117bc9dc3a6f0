//! Change-event publishing
//!
//! Fire-and-forget: publish failures are logged and never abort a cycle, and
//! an unconfigured notifier is a silent no-op.

use async_trait::async_trait;
use serde::Serialize;

/// Event emitted for every object that was actually re-uploaded
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub bucket: String,
    pub key: String,
}

/// Change-event sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, bucket: &str, key: &str);
}

/// Posts change events as JSON to a webhook, when one is configured
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, bucket: &str, key: &str) {
        let Some(url) = self.url.as_deref() else {
            return;
        };

        let event = ChangeEvent {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        };

        match self.http.post(url).json(&event).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(bucket, key, "change event published");
            }
            Ok(resp) => {
                tracing::warn!(bucket, key, status = %resp.status(), "change event rejected");
            }
            Err(err) => {
                tracing::warn!(bucket, key, "change event failed: {err}");
            }
        }
    }
}
