//! Gateway config file loading with environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled defaults
//! 2. If a config file is given, deep-merge its values over the defaults
//! 3. Apply `BUNCH_*` environment variable overrides (highest priority)

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use bunch_server::config::ServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// One token → identity mapping for the static verifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    /// Stable user ID.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

/// A member seeded into a bunch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberSeed {
    /// Stable user ID.
    pub user_id: String,
    /// Display name.
    pub username: String,
    /// Membership role (default `"member"`).
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "member".into()
}

/// A bunch seeded into the in-memory store at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BunchSeed {
    /// Bunch ID.
    pub id: String,
    /// Channel IDs to create.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Members to add.
    #[serde(default)]
    pub members: Vec<MemberSeed>,
}

/// Full gateway configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server bind and timing settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Static auth tokens.
    #[serde(default)]
    pub tokens: HashMap<String, TokenEntry>,
    /// Seed data for the in-memory chat store.
    #[serde(default)]
    pub bunches: Vec<BunchSeed>,
}

/// Load configuration, merging file values over defaults and applying env
/// overrides. A missing path yields pure defaults.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut merged = serde_json::to_value(GatewayConfig::default())?;

    if let Some(path) = path {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let user: Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        deep_merge(&mut merged, user);
    }

    let mut config: GatewayConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Merge `source` into `target` in place.
///
/// Objects merge key by key, recursing into shared keys; every other value
/// kind (arrays included) replaces the target wholesale. `null` in the
/// source leaves the target untouched, so a config file cannot unset a
/// default by accident.
pub fn deep_merge(target: &mut Value, source: Value) {
    let Value::Object(source_map) = source else {
        *target = source;
        return;
    };
    let Value::Object(target_map) = target else {
        *target = Value::Object(source_map);
        return;
    };
    for (key, value) in source_map {
        if value.is_null() {
            continue;
        }
        match target_map.get_mut(&key) {
            Some(slot) => deep_merge(slot, value),
            None => {
                let _ = target_map.insert(key, value);
            }
        }
    }
}

/// Apply `BUNCH_*` environment variable overrides. Invalid values are
/// logged and ignored, falling back to file/default.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Some(v) = read_env_string("BUNCH_HOST") {
        config.server.host = v;
    }
    if let Some(v) = read_env_u64("BUNCH_PORT", 0, 65535) {
        config.server.port = v as u16;
    }
    if let Some(v) = read_env_u64("BUNCH_PING_INTERVAL_SECS", 1, 600) {
        config.server.ping_interval_secs = v;
    }
    if let Some(v) = read_env_u64("BUNCH_PONG_TIMEOUT_SECS", 1, 600) {
        config.server.pong_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("BUNCH_QUEUE_CAPACITY", 1, 1_000_000) {
        config.server.outbound_queue_capacity = v as usize;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let parsed = val.parse::<u64>().ok().filter(|n| (min..=max).contains(n));
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.server.ping_interval_secs, 15);
        assert!(config.tokens.is_empty());
        assert!(config.bunches.is_empty());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "server": {"port": 8400},
                "tokens": {"tok_1": {"user_id": "u1", "username": "alice"}},
                "bunches": [{
                    "id": "b1",
                    "channels": ["general"],
                    "members": [{"user_id": "u1", "username": "alice", "role": "owner"}]
                }]
            }"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8400);
        // Untouched fields keep their defaults
        assert_eq!(config.server.pong_timeout_secs, 20);
        assert_eq!(config.tokens["tok_1"].username, "alice");
        assert_eq!(config.bunches[0].channels, vec!["general"]);
        assert_eq!(config.bunches[0].members[0].role, "owner");
    }

    #[test]
    fn member_role_defaults_to_member() {
        let seed: MemberSeed =
            serde_json::from_str(r#"{"user_id": "u1", "username": "alice"}"#).unwrap();
        assert_eq!(seed.role, "member");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn deep_merge_nested_override() {
        let mut target = serde_json::json!({"server": {"port": 1, "host": "localhost"}});
        deep_merge(&mut target, serde_json::json!({"server": {"port": 2}}));
        assert_eq!(target["server"]["port"], 2);
        assert_eq!(target["server"]["host"], "localhost");
    }

    #[test]
    fn deep_merge_null_preserves_target() {
        let mut target = serde_json::json!({"a": 1});
        deep_merge(&mut target, serde_json::json!({"a": null}));
        assert_eq!(target["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let mut target = serde_json::json!({"bunches": [{"id": "old"}]});
        deep_merge(&mut target, serde_json::json!({"bunches": [{"id": "new"}]}));
        assert_eq!(target["bunches"].as_array().unwrap().len(), 1);
        assert_eq!(target["bunches"][0]["id"], "new");
    }
}
