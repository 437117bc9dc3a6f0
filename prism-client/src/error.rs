//! Client error types

use thiserror::Error;

/// Client error type
///
/// Every variant aborts the caller's sync cycle; there is no per-call retry.
/// `RateLimited` and `VersionObsolete` carry a detached side effect (backoff
/// wait, app-version refresh) that runs independently of the failed call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, timeout). Fatal for the cycle.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request was throttled by the backend (429, or 403 with a block marker)
    #[error("too many requests: HTTP {0}")]
    RateLimited(u16),

    /// Backend is in maintenance (503)
    #[error("server maintenance: HTTP 503")]
    Maintenance,

    /// Client app version is no longer accepted (426)
    #[error("app version obsolete: HTTP 426")]
    VersionObsolete,

    /// Authentication / registration response missing expected fields
    #[error("auth error: {0}")]
    Auth(String),

    /// Any other non-200 status
    #[error("HTTP error {0}")]
    Http(u16),

    /// Wire encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Encryption or decryption failed
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
