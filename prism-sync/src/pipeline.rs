//! Sync pipeline — one full mirror cycle per trigger
//!
//! A non-blocking guard keeps at most one cycle in flight; a trigger that
//! arrives while a cycle runs is dropped, not queued. Any error aborts the
//! cycle with no partial-cycle state; the next trigger starts from scratch.

use std::sync::Arc;

use anyhow::{Context, Result};
use prism_client::{GameClient, Method};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::mirror::Mirror;
use crate::notify::Notifier;

pub struct SyncPipeline {
    client: GameClient,
    mirror: Mirror,
    notifier: Arc<dyn Notifier>,
    cycle_guard: Mutex<()>,
}

/// Routing info resolved per cycle from the version lookup
struct Routing {
    domain: String,
    profile: String,
    host_hash: String,
}

impl SyncPipeline {
    pub fn new(client: GameClient, mirror: Mirror, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client,
            mirror,
            notifier,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Run one sync cycle. A cycle already in flight makes this a no-op.
    pub async fn run_cycle(&self) -> Result<()> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            tracing::debug!("sync cycle already running, dropping trigger");
            return Ok(());
        };

        tracing::info!("querying updates");

        self.client.refresh_app_version().await?;
        let routing = self.resolve_routing().await?;
        let auth = self.client.authenticate(&routing.domain).await?;

        let mut updated = self.sync_key_values(&routing, &auth).await?;
        updated |= self.sync_asset_bundles(&routing).await?;

        if updated {
            tracing::info!("found updates");
        }
        Ok(())
    }

    /// Unauthenticated version-routing lookup keyed by app version/hash.
    async fn resolve_routing(&self) -> Result<Routing> {
        let app_version = self.client.version_field("appVersion").await;
        let app_hash = self.client.version_field("appHash").await;

        let body = self
            .client
            .request(
                Method::GET,
                &format!(
                    "{}/{app_version}/{app_hash}",
                    self.client.config().game_version_base
                ),
                None,
            )
            .await?;

        let field = |name: &str| -> Result<String> {
            body.get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .with_context(|| format!("version routing missing {name}"))
        };

        Ok(Routing {
            domain: field("domain")?,
            profile: field("profile")?,
            host_hash: field("assetbundleHostHash")?,
        })
    }

    /// Fetch every split-path batch and dedup-upload each key/value pair.
    async fn sync_key_values(&self, routing: &Routing, auth: &Value) -> Result<bool> {
        let paths = auth
            .get("suiteMasterSplitPath")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut updated = false;
        for path in paths.iter().filter_map(Value::as_str) {
            let batch = self
                .client
                .request(
                    Method::GET,
                    &format!("https://{}/api/{path}", routing.domain),
                    None,
                )
                .await?;

            if let Some(map) = batch.as_object() {
                for (key, value) in map {
                    updated |= self.upload_key_value(key, value).await?;
                }
            }
        }
        Ok(updated)
    }

    /// Fetch the bundle manifest; when it changed, diff each bundle's
    /// declared hash against the stored hash and re-upload mismatches.
    async fn sync_asset_bundles(&self, routing: &Routing) -> Result<bool> {
        let asset_version = self.client.version_field("assetVersion").await;
        let asset_hash = self.client.version_field("assetHash").await;
        let platform = self.client.config().platform.to_lowercase();
        let asset_domain = &self.client.config().asset_domain;

        let manifest = self
            .client
            .request(
                Method::GET,
                &format!(
                    "https://{}-{}-assetbundle-info.{asset_domain}/api/version/{asset_version}/os/{platform}",
                    routing.profile, routing.host_hash
                ),
                None,
            )
            .await?;

        if !self.upload_key_value("assetbundleInfo", &manifest).await? {
            return Ok(false);
        }

        let Some(bundles) = manifest.get("bundles").and_then(Value::as_object) else {
            tracing::warn!("asset-bundle manifest has no bundles map");
            return Ok(true);
        };

        for (key, meta) in bundles {
            let declared = meta.get("hash").and_then(Value::as_str).unwrap_or("");
            let object_key = self.mirror.assetbundle_key(key);

            if !declared.is_empty()
                && self.mirror.head_hash(&object_key).await.as_deref() == Some(declared)
            {
                continue;
            }

            let bundle_name = meta
                .get("bundleName")
                .and_then(Value::as_str)
                .unwrap_or(key);
            let bytes = self
                .client
                .request_raw(
                    Method::GET,
                    &format!(
                        "https://{}-{}-assetbundle.{asset_domain}/{asset_version}/{asset_hash}/{platform}/{bundle_name}",
                        routing.profile, routing.host_hash
                    ),
                )
                .await?;

            let hash = (!declared.is_empty()).then_some(declared);
            if self
                .mirror
                .upload_if_changed(&object_key, bytes, "application/octet-stream", hash)
                .await?
            {
                self.notifier.publish(self.mirror.bucket(), &object_key).await;
            }
        }

        Ok(true)
    }

    /// Dedup-upload one key/value resource as pretty-printed JSON; publishes
    /// a change event when a put actually happened.
    async fn upload_key_value(&self, key: &str, value: &Value) -> Result<bool> {
        let object_key = self.mirror.key_value_key(key);
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing resource {key}"))?;

        let updated = self
            .mirror
            .upload_if_changed(&object_key, bytes, "application/json", None)
            .await?;

        if updated {
            self.notifier.publish(self.mirror.bucket(), &object_key).await;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::tests::MemStore;
    use async_trait::async_trait;
    use prism_client::ClientConfig;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, bucket: &str, key: &str) {
            self.events
                .lock()
                .unwrap()
                .push((bucket.to_owned(), key.to_owned()));
        }
    }

    fn pipeline() -> (Arc<MemStore>, Arc<RecordingNotifier>, SyncPipeline) {
        let config = ClientConfig::new(
            "https://game-api.invalid",
            "https://issue.invalid",
            "https://version.invalid/index.json",
            "https://game-version.invalid",
            "assets.invalid",
            *b"0123456789abcdef",
            *b"fedcba9876543210",
        );
        let client = GameClient::new(config).unwrap();
        let store = Arc::new(MemStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mirror = Mirror::new(store.clone(), "mirror-bucket", "data");
        let p = SyncPipeline::new(client, mirror, notifier.clone());
        (store, notifier, p)
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_dropped() {
        let (store, notifier, p) = pipeline();

        let _held = p.cycle_guard.try_lock().unwrap();
        p.run_cycle().await.unwrap();

        assert!(store.puts.lock().unwrap().is_empty());
        assert!(notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_publishes_change_event() {
        let (_, notifier, p) = pipeline();

        let updated = p
            .upload_key_value("events", &json!({"id": 1}))
            .await
            .unwrap();
        assert!(updated);

        let events = notifier.events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[("mirror-bucket".to_owned(), "data/events.json".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_unchanged_upload_publishes_nothing() {
        let (store, notifier, p) = pipeline();

        let value = json!({"id": 1});
        assert!(p.upload_key_value("events", &value).await.unwrap());
        assert!(!p.upload_key_value("events", &value).await.unwrap());

        assert_eq!(store.puts.lock().unwrap().len(), 1);
        assert_eq!(notifier.events.lock().unwrap().len(), 1);
    }
}
