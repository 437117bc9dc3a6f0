//! Encrypted protocol client for the game backend
//!
//! Builds authenticated requests (binary map body, AES-CBC encrypted, fixed
//! device-identity headers), classifies responses by status, and maintains the
//! session state. Throttle and version-obsolete responses schedule detached
//! side effects that race the caller's next request.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::codec;
use crate::config::ClientConfig;
use crate::crypto::{deobfuscate, Crypt};
use crate::error::{ClientError, ClientResult};
use crate::limit::RateLimiter;
use crate::session::ClientSession;

/// Body marker distinguishing an edge-block 403 from an ordinary 403
const BLOCK_MARKER: &[u8] = b"Request blocked.";

/// Tokens drained from the shared bucket per throttled response
const THROTTLE_PENALTY: u32 = 5;

/// Bucket refill rate and capacity, tokens per second
const LIMITER_RATE: u32 = 64;
const LIMITER_BURST: u32 = 64;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Protocol client for the game backend
#[derive(Clone)]
pub struct GameClient {
    http: reqwest::Client,
    crypt: Crypt,
    limiter: RateLimiter,
    config: Arc<ClientConfig>,
    session: Arc<RwLock<ClientSession>>,
}

impl GameClient {
    /// Create a client with a pooled transport and a fresh install identity.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .pool_max_idle_per_host(config.pool_max_idle)
            .pool_idle_timeout(std::time::Duration::from_secs(60))
            .build()?;

        let crypt = Crypt::new(config.aes_key.clone(), config.aes_iv.clone())?;
        let session = ClientSession::new(
            uuid::Uuid::new_v4().to_string(),
            uuid::Uuid::new_v4().to_string(),
        );

        Ok(Self {
            http,
            crypt,
            limiter: RateLimiter::new(LIMITER_RATE, LIMITER_BURST),
            config: Arc::new(config),
            session: Arc::new(RwLock::new(session)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot of an app-version field, empty string when unknown.
    pub async fn version_field(&self, key: &str) -> String {
        self.session.read().await.version_field(key).to_owned()
    }

    /// Issue an encrypted request and decode the response map.
    ///
    /// A `GET` without a body sends no payload; any other method without a
    /// body sends an encrypted empty payload. Unauthenticated endpoints that
    /// answer with JSON are parsed directly; everything else is decrypted and
    /// decoded from the binary map encoding.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ClientResult<Value> {
        let payload = match body {
            Some(value) => self.crypt.encrypt(&codec::encode(value)?)?,
            None if method == Method::GET => Vec::new(),
            None => self.crypt.encrypt(&[])?,
        };

        let headers = {
            let session = self.session.read().await;
            self.build_headers(&session)?
        };

        let (resp_headers, data) = self.send(method, url, headers, payload).await?;

        // new session token / cookie overwrite stored state, last write wins
        {
            let mut session = self.session.write().await;
            capture_session_headers(&mut session, &resp_headers);
        }

        if header_str(&resp_headers, "content-type").as_deref() == Some(JSON_CONTENT_TYPE) {
            return serde_json::from_slice(&data).map_err(|e| ClientError::Codec(e.to_string()));
        }

        let plaintext = self.crypt.decrypt(&data)?;
        if plaintext.is_empty() {
            return Ok(Value::Null);
        }
        let value = codec::decode(&plaintext)?;

        if let Some(updated) = value.get("updatedResources").and_then(Value::as_object) {
            self.session.write().await.merge_resources(updated);
        }

        Ok(value)
    }

    /// Issue a request for obfuscated binary content (asset bundles).
    ///
    /// Same transport and status classification as [`request`](Self::request),
    /// but only the cookie header is sent and the body is returned
    /// deobfuscated instead of decrypted.
    pub async fn request_raw(&self, method: Method, url: &str) -> ClientResult<Vec<u8>> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = self.session.read().await.cookie.as_deref() {
            headers.insert(
                "cookie",
                HeaderValue::from_str(cookie)
                    .map_err(|_| ClientError::Codec("invalid cookie value".into()))?,
            );
        }

        let (_, data) = self.send(method, url, headers, Vec::new()).await?;
        Ok(deobfuscate(&data))
    }

    /// Startup registration: obtain a user id and credential, accept the
    /// rules, and resolve the current app version.
    pub async fn register(&self) -> ClientResult<()> {
        self.request(
            Method::POST,
            &format!("{}/api/signature", self.config.issue_base),
            None,
        )
        .await?;

        self.refresh_app_version().await?;

        let body = self
            .request(
                Method::POST,
                &format!("{}/api/user", self.config.api_base),
                Some(&json!({
                    "platform": self.config.platform,
                    "deviceModel": self.config.device_model,
                    "operatingSystem": self.config.operating_system,
                })),
            )
            .await?;

        let user_id = body
            .pointer("/userRegistration/userId")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClientError::Auth("registration response missing userId".into()))?;
        let credential = body
            .get("credential")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("registration response missing credential".into()))?
            .to_owned();

        {
            let mut session = self.session.write().await;
            session.user_id = user_id;
            session.credential = credential.clone();
        }

        self.request(
            Method::POST,
            &format!("{}/api/user/{user_id}/rule-agreement", self.config.api_base),
            Some(&json!({ "userId": 0, "credential": credential })),
        )
        .await?;

        tracing::info!(user_id, "registered game account");
        Ok(())
    }

    /// Refresh the app-version map: merge the public version index, then pick
    /// the server-selected available entry from the system endpoint.
    pub async fn refresh_app_version(&self) -> ClientResult<()> {
        let index: HashMap<String, String> = self
            .http
            .get(&self.config.version_index_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let current = {
            let mut session = self.session.write().await;
            session.app_version.extend(index);
            session.version_field("appVersion").to_owned()
        };

        let body = self
            .request(
                Method::GET,
                &format!("{}/api/system", self.config.api_base),
                None,
            )
            .await?;

        let empty = Vec::new();
        let versions = body
            .get("appVersions")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        let available = |v: &&Value| {
            v.get("appVersionStatus").and_then(Value::as_str) == Some("available")
        };
        let selected = versions
            .iter()
            .filter(available)
            .find(|v| v.get("appVersion").and_then(Value::as_str) == Some(current.as_str()))
            .or_else(|| versions.iter().find(available));

        if let Some(entry) = selected {
            let mut session = self.session.write().await;
            session.merge_version_fields(entry);
            tracing::info!(
                app_version = %session.version_field("appVersion"),
                asset_version = %session.version_field("assetVersion"),
                data_version = %session.version_field("dataVersion"),
                "app version refreshed"
            );
        } else {
            tracing::warn!("no available app version in system response");
        }

        Ok(())
    }

    /// Open a session: submit the credential to the auth endpoint on the
    /// routed domain, merge returned version fields, store the session token.
    /// Returns the full response body (split paths live there).
    pub async fn authenticate(&self, domain: &str) -> ClientResult<Value> {
        let (user_id, credential) = {
            let session = self.session.read().await;
            (session.user_id, session.credential.clone())
        };

        let body = self
            .request(
                Method::PUT,
                &format!("https://{domain}/api/user/{user_id}/auth?refreshUpdatedResources=False"),
                Some(&json!({ "credential": credential })),
            )
            .await?;

        let token = body
            .get("sessionToken")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("auth response missing sessionToken".into()))?
            .to_owned();

        {
            let mut session = self.session.write().await;
            session.merge_version_fields(&body);
            session.session_token = Some(token);
        }

        Ok(body)
    }

    /// Send, collect the body, classify the status. Non-200 raises after
    /// dispatching the paired detached side effect.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        payload: Vec<u8>,
    ) -> ClientResult<(HeaderMap, Vec<u8>)> {
        let response = self
            .http
            .request(method, url)
            .headers(headers)
            .body(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let resp_headers = response.headers().clone();
        let data = response.bytes().await?.to_vec();

        if let Err(err) = classify(status, &data) {
            self.dispatch_side_effect(&err);
            return Err(err);
        }
        Ok((resp_headers, data))
    }

    /// Fixed header set for authenticated calls.
    fn build_headers(&self, session: &ClientSession) -> ClientResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| -> ClientResult<()> {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::Codec(format!("invalid header value for {name}")))?;
            headers.insert(name, value);
            Ok(())
        };

        put("accept", "application/octet-stream")?;
        put("content-type", "application/octet-stream")?;

        put("x-ai", "")?;
        put("x-ga", "")?;
        put("x-ma", "")?;
        put("x-kc", &session.key_exchange_id)?;
        put("x-if", "")?;

        put("x-devicemodel", &self.config.device_model)?;
        put("x-operatingsystem", &self.config.operating_system)?;
        put("x-platform", &self.config.platform)?;
        put("user-agent", &self.config.user_agent)?;

        put("x-unity-version", &self.config.unity_version)?;
        put("x-app-hash", session.version_field("appHash"))?;
        put("x-app-version", session.version_field("appVersion"))?;
        put("x-asset-version", session.version_field("assetVersion"))?;
        put("x-data-version", session.version_field("dataVersion"))?;

        put("x-install-id", &session.install_id)?;
        put("x-request-id", &uuid::Uuid::new_v4().to_string())?;

        if let Some(token) = session.session_token.as_deref() {
            put("x-session-token", token)?;
        }
        if let Some(cookie) = session.cookie.as_deref() {
            put("cookie", cookie)?;
        }

        Ok(headers)
    }

    /// Detached side effects paired with classified errors. They run
    /// uncoordinated with the failing call's continuation: a request issued
    /// right after a throttle is not guaranteed to observe the penalty.
    fn dispatch_side_effect(&self, err: &ClientError) {
        match err {
            ClientError::RateLimited(status) => {
                tracing::warn!(status, "throttled, scheduling backoff");
                let limiter = self.limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire(THROTTLE_PENALTY).await;
                });
            }
            ClientError::VersionObsolete => {
                tracing::warn!("app version obsolete, scheduling refresh");
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.refresh_app_version().await {
                        tracing::error!("background app-version refresh failed: {e}");
                    }
                });
            }
            _ => {}
        }
    }
}

/// Map a response status (and body, for the 403 block marker) to an error.
fn classify(status: u16, body: &[u8]) -> Result<(), ClientError> {
    match status {
        200 => Ok(()),
        403 if contains(body, BLOCK_MARKER) => Err(ClientError::RateLimited(status)),
        426 => Err(ClientError::VersionObsolete),
        429 => Err(ClientError::RateLimited(status)),
        503 => Err(ClientError::Maintenance),
        _ => Err(ClientError::Http(status)),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Overwrite stored session token / cookie from response headers.
/// An empty header value is treated as absent and never overwrites.
fn capture_session_headers(session: &mut ClientSession, headers: &HeaderMap) {
    if let Some(token) = header_str(headers, "x-session-token").filter(|v| !v.is_empty()) {
        session.session_token = Some(token);
    }
    if let Some(cookie) = header_str(headers, "set-cookie").filter(|v| !v.is_empty()) {
        session.cookie = Some(cookie);
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> GameClient {
        let config = ClientConfig::new(
            "https://game-api.example.com",
            "https://issue.example.com",
            "https://version.example.com/index.json",
            "https://game-version.example.com",
            "assets.example.com",
            *b"0123456789abcdef",
            *b"fedcba9876543210",
        );
        GameClient::new(config).unwrap()
    }

    #[test]
    fn test_classify_success() {
        assert!(classify(200, b"").is_ok());
    }

    #[test]
    fn test_classify_rate_limits() {
        assert!(matches!(
            classify(429, b""),
            Err(ClientError::RateLimited(429))
        ));
        assert!(matches!(
            classify(403, b"Request blocked."),
            Err(ClientError::RateLimited(403))
        ));
        assert!(matches!(
            classify(403, b"error: Request blocked. (edge)"),
            Err(ClientError::RateLimited(403))
        ));
    }

    #[test]
    fn test_classify_plain_forbidden_is_generic() {
        assert!(matches!(classify(403, b"nope"), Err(ClientError::Http(403))));
    }

    #[test]
    fn test_classify_maintenance_and_upgrade() {
        assert!(matches!(classify(503, b""), Err(ClientError::Maintenance)));
        assert!(matches!(
            classify(426, b""),
            Err(ClientError::VersionObsolete)
        ));
    }

    #[test]
    fn test_classify_other_statuses() {
        assert!(matches!(classify(404, b""), Err(ClientError::Http(404))));
        assert!(matches!(classify(500, b""), Err(ClientError::Http(500))));
    }

    #[tokio::test]
    async fn test_headers_without_session_token() {
        let client = test_client();
        let session = client.session.read().await;
        let headers = client.build_headers(&session).unwrap();

        assert!(headers.get("x-session-token").is_none());
        assert!(headers.get("cookie").is_none());
        assert_eq!(headers["x-platform"], "iOS");
        assert_eq!(headers["x-app-version"], "");
        assert!(headers.get("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_headers_after_session_established() {
        let client = test_client();
        {
            let mut session = client.session.write().await;
            session.session_token = Some("tok-1".into());
            session.cookie = Some("affinity=a1".into());
            session
                .app_version
                .insert("appVersion".into(), "5.3.0".into());
        }

        let session = client.session.read().await;
        let headers = client.build_headers(&session).unwrap();
        assert_eq!(headers["x-session-token"], "tok-1");
        assert_eq!(headers["cookie"], "affinity=a1");
        assert_eq!(headers["x-app-version"], "5.3.0");
    }

    #[tokio::test]
    async fn test_captured_response_headers_feed_next_request() {
        let client = test_client();

        let mut response = HeaderMap::new();
        response.insert("x-session-token", HeaderValue::from_static("tok-9"));
        response.insert("set-cookie", HeaderValue::from_static("affinity=b2"));
        {
            let mut session = client.session.write().await;
            capture_session_headers(&mut session, &response);
        }

        let session = client.session.read().await;
        let headers = client.build_headers(&session).unwrap();
        assert_eq!(headers["x-session-token"], "tok-9");
        assert_eq!(headers["cookie"], "affinity=b2");
    }

    #[tokio::test]
    async fn test_empty_response_headers_do_not_overwrite() {
        let client = test_client();
        let mut session = client.session.write().await;
        session.session_token = Some("tok-1".into());

        let mut response = HeaderMap::new();
        response.insert("x-session-token", HeaderValue::from_static(""));
        response.insert("set-cookie", HeaderValue::from_static(""));
        capture_session_headers(&mut session, &response);

        assert_eq!(session.session_token.as_deref(), Some("tok-1"));
        assert!(session.cookie.is_none());
    }

    #[tokio::test]
    async fn test_request_ids_are_fresh() {
        let client = test_client();
        let session = client.session.read().await;
        let first = client.build_headers(&session).unwrap();
        let second = client.build_headers(&session).unwrap();
        assert_ne!(first["x-request-id"], second["x-request-id"]);
    }
}
