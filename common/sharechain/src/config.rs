//! Configuration for the share tracker
//!
//! `TrackerConfig` selects the network preset and tunes the fork-choice and
//! pruning windows. Every field has a default, so an empty table is valid.

use serde::{Deserialize, Serialize};

use crate::network::{NetworkKind, NetworkParams};

/// Configuration for [`crate::tracker::ShareTracker`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Network preset: "bitcoin", "testnet" or "regtest"
    /// Default: bitcoin
    #[serde(default = "default_network")]
    pub network: NetworkKind,

    /// Ancestors checked per unverified head on each pass
    /// Default: 5
    #[serde(default = "default_verify_window")]
    pub verify_window: usize,

    /// Best-scored heads that are never pruned
    /// Default: 5
    #[serde(default = "default_top_heads_kept")]
    pub top_heads_kept: usize,

    /// Seconds a head must have been known before it can be pruned
    /// Default: 300
    #[serde(default = "default_head_prune_age_secs")]
    pub head_prune_age_secs: u64,

    /// Seconds during which a recently seen sibling protects an unverified head
    /// Default: 120
    #[serde(default = "default_recent_descendant_secs")]
    pub recent_descendant_secs: u64,

    /// Look-back applied to desired-ancestor requests
    /// Default: 3600
    #[serde(default = "default_desired_max_age_secs")]
    pub desired_max_age_secs: u64,

    /// Upper bound on pruning iterations per maintenance pass
    /// Default: 1000
    #[serde(default = "default_max_prune_rounds")]
    pub max_prune_rounds: usize,
}

impl TrackerConfig {
    /// Network parameters for the configured preset.
    pub fn network_params(&self) -> NetworkParams {
        NetworkParams::for_kind(self.network)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            verify_window: default_verify_window(),
            top_heads_kept: default_top_heads_kept(),
            head_prune_age_secs: default_head_prune_age_secs(),
            recent_descendant_secs: default_recent_descendant_secs(),
            desired_max_age_secs: default_desired_max_age_secs(),
            max_prune_rounds: default_max_prune_rounds(),
        }
    }
}

// Default value functions

fn default_network() -> NetworkKind {
    NetworkKind::Bitcoin
}

fn default_verify_window() -> usize {
    5
}

fn default_top_heads_kept() -> usize {
    5
}

fn default_head_prune_age_secs() -> u64 {
    300
}

fn default_recent_descendant_secs() -> u64 {
    120
}

fn default_desired_max_age_secs() -> u64 {
    3600
}

fn default_max_prune_rounds() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_defaults() {
        let config: TrackerConfig = toml::from_str("").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.network, NetworkKind::Bitcoin);
        assert_eq!(config.verify_window, 5);
        assert_eq!(config.head_prune_age_secs, 300);
        assert_eq!(config.max_prune_rounds, 1000);
    }

    #[test]
    fn test_tracker_config_custom_values() {
        let config_toml = r#"
            network = "testnet"
            top_heads_kept = 8
            recent_descendant_secs = 60
        "#;

        let config: TrackerConfig = toml::from_str(config_toml).unwrap();
        assert_eq!(config.network, NetworkKind::Testnet);
        assert_eq!(config.top_heads_kept, 8);
        assert_eq!(config.recent_descendant_secs, 60);
        assert_eq!(config.network_params().chain_length, 360);
    }

    #[test]
    fn test_tracker_config_rejects_unknown_network() {
        let result: Result<TrackerConfig, _> = toml::from_str(r#"network = "litecoin""#);
        assert!(result.is_err());
    }
}
