use std::path::Path;

use serde::Deserialize;

const CONFIG_FILE: &str = "remed_config.json";

/// Engine tuning knobs. Loaded from `<data_dir>/remed_config.json`; every
/// field has a default so a missing or partial file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub disable_network: Option<bool>,

    /// Chat-list cache TTL. The list changes often but is cheap to refetch.
    pub conversations_ttl_secs: u64,
    /// Per-conversation message window TTL. Long on purpose: remote message
    /// reads are the expensive path we are minimizing.
    pub messages_ttl_secs: u64,
    /// Friends / friend-request cache TTL.
    pub social_ttl_secs: u64,

    /// Backward pagination page size (tens, not hundreds).
    pub page_size: usize,
    /// Cap on each live-subscription batch. The subscription is a
    /// supplementary channel; bulk history goes through pagination.
    pub live_page_size: usize,
    /// Result cap for a first attach with no cursor (bounded initial burst).
    pub initial_burst_limit: usize,

    /// How long the app may sit in the background before live subscriptions
    /// are torn down.
    pub background_grace_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.remed.app".to_string(),
            disable_network: None,
            conversations_ttl_secs: 30 * 60,
            messages_ttl_secs: 12 * 60 * 60,
            social_ttl_secs: 10 * 60,
            page_size: 30,
            live_page_size: 25,
            initial_burst_limit: 50,
            background_grace_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("REMED_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub fn conversations_ttl_ms(&self) -> i64 {
        self.conversations_ttl_secs as i64 * 1000
    }

    pub fn messages_ttl_ms(&self) -> i64 {
        self.messages_ttl_secs as i64 * 1000
    }

    pub fn social_ttl_ms(&self) -> i64 {
        self.social_ttl_secs as i64 * 1000
    }
}

pub fn load_sync_config(data_dir: &str) -> SyncConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return SyncConfig::default();
    };
    serde_json::from_slice::<SyncConfig>(&bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"page_size": 10}"#).unwrap();
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.live_page_size, SyncConfig::default().live_page_size);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_sync_config("/definitely/not/a/dir");
        assert_eq!(cfg.page_size, SyncConfig::default().page_size);
    }
}
