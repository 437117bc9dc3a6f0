//! Content-addressed dedup upload into the object store
//!
//! Objects carry their content hash as metadata. An upload is skipped when
//! the stored hash for the key already matches, so unchanged data never
//! leaves the process.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Attempts made to confirm an object exists after a put
const CONFIRM_ATTEMPTS: u32 = 5;
const CONFIRM_DELAY_SECS: u64 = 2;

/// Key/blob store with hash-carrying metadata
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stored content hash for a key, `None` when the object does not exist.
    async fn head_hash(&self, key: &str) -> Result<Option<String>>;

    /// Store bytes under a key with the given content hash as metadata.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str, hash: &str) -> Result<()>;
}

/// S3-backed object store
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Post-put existence confirmation (waiter analogue).
    async fn confirm_exists(&self, key: &str) -> Result<()> {
        for attempt in 1..=CONFIRM_ATTEMPTS {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => return Ok(()),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_not_found()) =>
                {
                    if attempt < CONFIRM_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(CONFIRM_DELAY_SECS))
                            .await;
                    }
                }
                Err(err) => return Err(err).context("head after put failed"),
            }
        }
        anyhow::bail!("object {key} not visible after put");
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_hash(&self, key: &str) -> Result<Option<String>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(output.metadata().and_then(|m| m.get("hash")).cloned()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_not_found()) =>
            {
                Ok(None)
            }
            Err(err) => Err(err).context("head object failed"),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str, hash: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(bytes.into())
            .content_type(content_type)
            .acl(aws_sdk_s3::types::ObjectCannedAcl::PublicRead)
            .metadata("hash", hash)
            .send()
            .await
            .with_context(|| format!("put object {key} failed"))?;

        self.confirm_exists(key).await
    }
}

/// Dedup-upload front end over an [`ObjectStore`]
#[derive(Clone)]
pub struct Mirror {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl Mirror {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Bucket name, for change events.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a key/value resource.
    pub fn key_value_key(&self, key: &str) -> String {
        format!("{}/{key}.json", self.prefix)
    }

    /// Object key for an asset bundle.
    pub fn assetbundle_key(&self, key: &str) -> String {
        format!("{}/assetbundle/{key}.unity3d", self.prefix)
    }

    /// Stored hash lookup; store errors degrade to "unknown" so a flaky head
    /// forces a re-upload instead of aborting the cycle.
    pub async fn head_hash(&self, object_key: &str) -> Option<String> {
        match self.store.head_hash(object_key).await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::debug!(object_key, "head failed, treating as missing: {err:#}");
                None
            }
        }
    }

    /// Upload unless the stored hash already matches. Returns whether a put
    /// happened. `hash` falls back to the SHA-256 of the bytes.
    pub async fn upload_if_changed(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        hash: Option<&str>,
    ) -> Result<bool> {
        let hash = match hash {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => hex::encode(Sha256::digest(&bytes)),
        };

        if self.head_hash(object_key).await.as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }

        tracing::info!(object_key, "updating object");
        self.store.put(object_key, bytes, content_type, &hash).await?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store recording puts, for pipeline and mirror tests
    #[derive(Default)]
    pub(crate) struct MemStore {
        pub objects: Mutex<HashMap<String, String>>,
        pub puts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for MemStore {
        async fn head_hash(&self, key: &str) -> Result<Option<String>> {
            Ok(self.objects.lock().unwrap().get(key).cloned())
        }

        async fn put(
            &self,
            key: &str,
            _bytes: Vec<u8>,
            _content_type: &str,
            hash: &str,
        ) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_owned(), hash.to_owned());
            self.puts.lock().unwrap().push(key.to_owned());
            Ok(())
        }
    }

    fn mirror(store: Arc<MemStore>) -> Mirror {
        Mirror::new(store, "mirror-bucket", "data")
    }

    #[test]
    fn test_key_layout() {
        let m = mirror(Arc::new(MemStore::default()));
        assert_eq!(m.key_value_key("gachas"), "data/gachas.json");
        assert_eq!(
            m.assetbundle_key("title_screen"),
            "data/assetbundle/title_screen.unity3d"
        );
    }

    #[tokio::test]
    async fn test_second_identical_upload_is_noop() {
        let store = Arc::new(MemStore::default());
        let m = mirror(store.clone());

        let first = m
            .upload_if_changed("data/a.json", b"payload".to_vec(), "application/json", None)
            .await
            .unwrap();
        let second = m
            .upload_if_changed("data/a.json", b"payload".to_vec(), "application/json", None)
            .await
            .unwrap();

        assert!(first);
        assert!(!second, "unchanged content must not be re-uploaded");
        assert_eq!(store.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_is_uploaded_again() {
        let store = Arc::new(MemStore::default());
        let m = mirror(store.clone());

        m.upload_if_changed("data/a.json", b"one".to_vec(), "application/json", None)
            .await
            .unwrap();
        let updated = m
            .upload_if_changed("data/a.json", b"two".to_vec(), "application/json", None)
            .await
            .unwrap();

        assert!(updated);
        assert_eq!(store.puts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_supplied_hash_wins_over_computed() {
        let store = Arc::new(MemStore::default());
        let m = mirror(store.clone());

        m.upload_if_changed("k", b"bytes".to_vec(), "application/octet-stream", Some("abc"))
            .await
            .unwrap();
        assert_eq!(store.objects.lock().unwrap()["k"], "abc");

        // same declared hash, different bytes: still deduped
        let updated = m
            .upload_if_changed("k", b"other".to_vec(), "application/octet-stream", Some("abc"))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_empty_supplied_hash_falls_back_to_sha256() {
        let store = Arc::new(MemStore::default());
        let m = mirror(store.clone());

        m.upload_if_changed("k", b"bytes".to_vec(), "application/octet-stream", Some(""))
            .await
            .unwrap();
        let expected = hex::encode(Sha256::digest(b"bytes"));
        assert_eq!(store.objects.lock().unwrap()["k"], expected);
    }
}
