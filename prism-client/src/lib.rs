//! Prism Client - encrypted protocol client for the game backend
//!
//! Handles registration, session renewal, AES-CBC wire encryption, the
//! compact binary map encoding, and response status classification.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod limit;
pub mod session;

pub use config::ClientConfig;
pub use crypto::{deobfuscate, Crypt};
pub use error::{ClientError, ClientResult};
pub use http::GameClient;
pub use limit::RateLimiter;
pub use session::ClientSession;

// Re-export the HTTP method type used by `GameClient::request`
pub use reqwest::Method;
