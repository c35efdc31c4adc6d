//! Node configuration
//!
//! Typed sections with sensible defaults, loaded from an optional YAML file
//! and `P2PX_`-prefixed environment overrides (nested keys separated by
//! `__`, e.g. `P2PX_NODE__DATA_DIR=/var/lib/p2px`).

use network::{Multiaddr, MultiaddrError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use types::pair::{validate_evm_address, AddressError, PairTokens};
use types::proof::NodeType;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeSection,
    pub network: NetworkSection,
    pub storage: StorageSection,
    #[serde(rename = "match")]
    pub matching: MatchSection,
    pub relay: RelaySection,
    pub metrics: MetricsSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeSection::default(),
            network: NetworkSection::default(),
            storage: StorageSection::default(),
            matching: MatchSection::default(),
            relay: RelaySection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub data_dir: PathBuf,
    /// Listen multiaddrs, e.g. `/ip4/0.0.0.0/tcp/4001`.
    pub listen: Vec<String>,
    /// 20-byte EVM address rewards accrue to; required to start.
    pub reward_wallet: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_type: NodeType::Relay,
            data_dir: PathBuf::from("./data"),
            listen: vec!["/ip4/0.0.0.0/tcp/4001".to_string()],
            reward_wallet: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub bootstrap: Vec<String>,
    /// Extra topics to subscribe to (observed and logged only).
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// `<= 0` means the two-week default window.
    pub retention_months: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatchSection {
    /// `pair -> {token0, token1}` registrations.
    pub pairs: HashMap<String, PairTokens>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// Reception guard thresholds; 0 disables a dimension.
    pub rate_limit_bytes_per_sec_per_peer: u64,
    pub rate_limit_msgs_per_sec_per_peer: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub proof_period_days: u32,
    /// Empty means `{data_dir}/proofs`.
    pub proof_output_dir: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            proof_period_days: 7,
            proof_output_dir: String::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("node.reward_wallet is required")]
    MissingRewardWallet,

    #[error("node.reward_wallet: {0}")]
    BadRewardWallet(#[from] AddressError),

    #[error("node.listen entry: {0}")]
    BadListen(#[from] MultiaddrError),

    #[error("network.bootstrap entry: {0}")]
    BadBootstrap(MultiaddrError),
}

impl Config {
    /// Load from `path` (required when given), or `config.yaml` next to the
    /// process (optional), with environment overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(p) => builder.add_source(config::File::with_name(p)),
            None => builder.add_source(config::File::with_name("config").required(false)),
        };
        let mut cfg: Config = builder
            .add_source(
                config::Environment::with_prefix("P2PX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if cfg.node.listen.is_empty() {
            cfg.node.listen = NodeSection::default().listen;
        }
        if cfg.metrics.proof_period_days == 0 {
            cfg.metrics.proof_period_days = 7;
        }
        if cfg.storage.retention_months < 0 {
            cfg.storage.retention_months = 0;
        }
        Ok(cfg)
    }

    /// Fatal-at-startup checks: reward wallet shape and address syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.reward_wallet.is_empty() {
            return Err(ConfigError::MissingRewardWallet);
        }
        validate_evm_address(&self.node.reward_wallet)?;
        self.listen_multiaddrs()?;
        self.bootstrap_multiaddrs()?;
        Ok(())
    }

    pub fn listen_multiaddrs(&self) -> Result<Vec<Multiaddr>, ConfigError> {
        self.node
            .listen
            .iter()
            .map(|s| s.parse::<Multiaddr>().map_err(ConfigError::from))
            .collect()
    }

    pub fn bootstrap_multiaddrs(&self) -> Result<Vec<Multiaddr>, ConfigError> {
        self.network
            .bootstrap
            .iter()
            .map(|s| s.parse::<Multiaddr>().map_err(ConfigError::BadBootstrap))
            .collect()
    }

    /// Proof directory: configured or `{data_dir}/proofs`.
    pub fn proof_output_dir(&self) -> PathBuf {
        if self.metrics.proof_output_dir.is_empty() {
            self.node.data_dir.join("proofs")
        } else {
            PathBuf::from(&self.metrics.proof_output_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "0x00112233445566778899aabbccddeeff00112233";

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.node.node_type, NodeType::Relay);
        assert_eq!(cfg.node.listen, ["/ip4/0.0.0.0/tcp/4001"]);
        assert_eq!(cfg.metrics.proof_period_days, 7);
        assert_eq!(cfg.storage.retention_months, 0);
        assert!(cfg.matching.pairs.is_empty());
        assert_eq!(cfg.proof_output_dir(), PathBuf::from("./data/proofs"));
    }

    #[test]
    fn test_load_yaml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
node:
  type: match
  data_dir: /tmp/p2px
  reward_wallet: "0x00112233445566778899aabbccddeeff00112233"
match:
  pairs:
    TKA/TKB:
      token0: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
      token1: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
relay:
  rate_limit_bytes_per_sec_per_peer: 1048576
storage:
  retention_months: 6
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.node.node_type, NodeType::Match);
        assert_eq!(cfg.storage.retention_months, 6);
        assert_eq!(cfg.relay.rate_limit_bytes_per_sec_per_peer, 1_048_576);
        assert_eq!(cfg.matching.pairs.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingRewardWallet)));

        cfg.node.reward_wallet = "not-an-address".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::BadRewardWallet(_))));

        cfg.node.reward_wallet = WALLET.into();
        cfg.node.listen = vec!["localhost:1234".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::BadListen(_))));

        cfg.node.listen = vec!["/ip4/0.0.0.0/tcp/4001".into()];
        cfg.network.bootstrap = vec!["garbage".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::BadBootstrap(_))));
    }
}
