//! Per-process session state owned by the protocol client
//!
//! The session is created once at registration and lives for the process
//! lifetime. Token and cookie are overwritten last-write-wins whenever a
//! response carries new values; the app-version map is merged on refresh.
//! Only the protocol client writes this state.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Mutable authentication and versioning state for the backend session
#[derive(Debug, Default)]
pub struct ClientSession {
    /// Server-assigned user id (registration response)
    pub user_id: u64,
    /// Long-lived credential used to open sessions
    pub credential: String,
    /// Short-lived token echoed back on every authenticated request
    pub session_token: Option<String>,
    /// Backend affinity cookie, stored verbatim from `set-cookie`
    pub cookie: Option<String>,
    /// Random install identity, fixed at startup
    pub install_id: String,
    /// Random key-exchange identity, fixed at startup
    pub key_exchange_id: String,
    /// Merged app/asset/data version fields selected by the server
    pub app_version: HashMap<String, String>,
    /// Local cache of `updatedResources` entries from responses
    pub resources: Map<String, Value>,
}

impl ClientSession {
    pub fn new(install_id: String, key_exchange_id: String) -> Self {
        Self {
            install_id,
            key_exchange_id,
            ..Self::default()
        }
    }

    /// Merge only the string-valued fields of a response map into the
    /// app-version map (version endpoints mix strings with other metadata).
    pub fn merge_version_fields(&mut self, fields: &Value) {
        if let Some(map) = fields.as_object() {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    self.app_version.insert(k.clone(), s.to_owned());
                }
            }
        }
    }

    /// Overwrite-on-key merge of an `updatedResources` map into the cache.
    pub fn merge_resources(&mut self, updated: &Map<String, Value>) {
        for (k, v) in updated {
            self.resources.insert(k.clone(), v.clone());
        }
    }

    /// App-version field lookup, empty string when unknown.
    pub fn version_field(&self, key: &str) -> &str {
        self.app_version.get(key).map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_version_fields_keeps_strings_only() {
        let mut session = ClientSession::default();
        session.merge_version_fields(&json!({
            "appVersion": "5.3.0",
            "assetVersion": "5.3.0.10",
            "suiteMasterSplitPath": ["a", "b"],
            "refresh": false,
        }));
        assert_eq!(session.version_field("appVersion"), "5.3.0");
        assert_eq!(session.version_field("assetVersion"), "5.3.0.10");
        assert!(!session.app_version.contains_key("suiteMasterSplitPath"));
        assert!(!session.app_version.contains_key("refresh"));
    }

    #[test]
    fn test_merge_resources_overwrites_on_key() {
        let mut session = ClientSession::default();
        let first = json!({"gacha": 1, "event": 2});
        let second = json!({"event": 3});
        session.merge_resources(first.as_object().unwrap());
        session.merge_resources(second.as_object().unwrap());
        assert_eq!(session.resources["gacha"], 1);
        assert_eq!(session.resources["event"], 3);
    }

    #[test]
    fn test_unknown_version_field_is_empty() {
        assert_eq!(ClientSession::default().version_field("appHash"), "");
    }
}
