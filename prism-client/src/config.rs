//! Client configuration

/// Endpoint layout and device identity for the game backend
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Main game API base URL (e.g., "https://game-api.example.com")
    pub api_base: String,

    /// Signature-issue endpoint base URL
    pub issue_base: String,

    /// Public version-index manifest URL (plain JSON, unauthenticated)
    pub version_index_url: String,

    /// Version-routing lookup base URL, queried as `{base}/{appVersion}/{appHash}`
    pub game_version_base: String,

    /// Domain suffix for asset hosts; the manifest host becomes
    /// `https://{profile}-{hostHash}-assetbundle-info.{asset_domain}` and the
    /// download host `https://{profile}-{hostHash}-assetbundle.{asset_domain}`
    pub asset_domain: String,

    /// Platform identifier sent in headers and registration ("iOS")
    pub platform: String,

    /// Device model reported in headers
    pub device_model: String,

    /// Operating system reported in headers
    pub operating_system: String,

    /// User-agent string
    pub user_agent: String,

    /// Engine version header value
    pub unity_version: String,

    /// AES key for payload encryption (16/24/32 bytes)
    pub aes_key: Vec<u8>,

    /// AES IV for payload encryption (16 bytes)
    pub aes_iv: Vec<u8>,

    /// Per-request transport timeout in seconds
    pub timeout: u64,

    /// Idle connections kept per host
    pub pool_max_idle: usize,
}

impl ClientConfig {
    /// Create a configuration with the fixed device identity defaults.
    pub fn new(
        api_base: impl Into<String>,
        issue_base: impl Into<String>,
        version_index_url: impl Into<String>,
        game_version_base: impl Into<String>,
        asset_domain: impl Into<String>,
        aes_key: impl Into<Vec<u8>>,
        aes_iv: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            issue_base: issue_base.into(),
            version_index_url: version_index_url.into(),
            game_version_base: game_version_base.into(),
            asset_domain: asset_domain.into(),
            platform: "iOS".into(),
            device_model: "iPad12,1".into(),
            operating_system: "iPadOS 17.0".into(),
            user_agent: "ProductName/211 CFNetwork/1568.100.1.2.1 Darwin/24.0.0".into(),
            unity_version: "2022.3.21f1".into(),
            aes_key: aes_key.into(),
            aes_iv: aes_iv.into(),
            timeout: 60,
            pool_max_idle: 64,
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Set the platform identity
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::new(
            "https://game-api.example.com",
            "https://issue.example.com",
            "https://version.example.com/index.json",
            "https://game-version.example.com",
            "assets.example.com",
            *b"0123456789abcdef",
            *b"fedcba9876543210",
        )
        .with_timeout(30)
        .with_platform("Android");

        assert_eq!(config.timeout, 30);
        assert_eq!(config.platform, "Android");
    }

    #[test]
    fn test_device_identity_defaults() {
        let config = ClientConfig::new("a", "i", "v", "g", "d", [0u8; 16], [0u8; 16]);
        assert_eq!(config.platform, "iOS");
        assert_eq!(config.timeout, 60);
        assert_eq!(config.pool_max_idle, 64);
    }
}
