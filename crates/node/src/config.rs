use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use common::crypto::{KeyShare, NetworkKey, ThresholdError};
use common::custody::{CustodyNode, DEFAULT_MAX_SKEW_SECS};
use common::oracle::{JsonRpcOracle, OracleError};
use common::policy::{ChainId, PolicyError};

/// On-disk configuration of one custody node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the HTTP API listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// This node's share of the network scalar, hex encoded
    pub share: String,
    /// The network public key every node announces
    pub network_key: String,
    pub threshold: usize,
    pub nodes: usize,
    /// Domain requesters must issue their assertions for
    pub domain: String,
    /// JSON-RPC endpoint per chain name, e.g. `ethereum = "https://..."`
    #[serde(default)]
    pub rpc: BTreeMap<String, Url>,
    #[serde(default = "default_max_skew_secs")]
    pub max_skew_secs: i64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write a daily rolling log here as well as to stdout
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 7000)
}

fn default_max_skew_secs() -> i64 {
    DEFAULT_MAX_SKEW_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid key material: {0}")]
    Key(#[from] ThresholdError),
    #[error("invalid rpc chain: {0}")]
    Chain(#[from] PolicyError),
    #[error("oracle setup failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_toml = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&config_toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 || self.threshold > self.nodes {
            return Err(ConfigError::Invalid(format!(
                "threshold {} is not within 1..={}",
                self.threshold, self.nodes
            )));
        }
        if self.domain.is_empty() {
            return Err(ConfigError::Invalid("domain is empty".to_string()));
        }
        if self.max_skew_secs < 0 {
            return Err(ConfigError::Invalid("max_skew_secs is negative".to_string()));
        }
        let share = KeyShare::from_hex(&self.share)?;
        if usize::from(share.index()) > self.nodes {
            return Err(ConfigError::Invalid(format!(
                "share index {} exceeds node count {}",
                share.index(),
                self.nodes
            )));
        }
        NetworkKey::from_hex(&self.network_key)?;
        self.rpc_endpoints()?;
        Ok(())
    }

    pub fn rpc_endpoints(&self) -> Result<HashMap<ChainId, Url>, ConfigError> {
        self.rpc
            .iter()
            .map(|(chain, url)| Ok((ChainId::from_str(chain)?, url.clone())))
            .collect()
    }

    /// Assemble the node, evaluating policies over the configured RPC endpoints
    pub fn build_node(&self) -> Result<CustodyNode, ConfigError> {
        let oracle = JsonRpcOracle::new(self.rpc_endpoints()?)?;
        let node = CustodyNode::new(
            KeyShare::from_hex(&self.share)?,
            NetworkKey::from_hex(&self.network_key)?,
            self.threshold,
            self.nodes,
            self.domain.clone(),
            Arc::new(oracle),
        )
        .with_max_skew(chrono::Duration::seconds(self.max_skew_secs));
        Ok(node)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::crypto::deal;

    fn config_toml() -> String {
        let (network_key, shares) = deal(2, 3).unwrap();
        format!(
            r#"
share = "{}"
network_key = "{}"
threshold = 2
nodes = 3
domain = "custody.test"

[rpc]
ethereum = "https://rpc.example.com/"
"#,
            shares[1].to_hex(),
            network_key.to_hex()
        )
    }

    #[test]
    fn test_defaults() {
        let config: NodeConfig = toml::from_str(&config_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.max_skew_secs, DEFAULT_MAX_SKEW_SECS);
        assert_eq!(config.log_level(), tracing::Level::INFO);
        assert!(config.log_dir.is_none());
        assert!(config
            .rpc_endpoints()
            .unwrap()
            .contains_key(&ChainId::Ethereum));
    }

    #[test]
    fn test_build_node() {
        let config: NodeConfig = toml::from_str(&config_toml()).unwrap();
        let node = config.build_node().unwrap();
        assert_eq!(node.index(), 2);
        assert_eq!(node.info().threshold, 2);
        assert_eq!(node.info().domain, "custody.test");
    }

    #[test]
    fn test_save_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("node.toml");
        let config: NodeConfig = toml::from_str(&config_toml()).unwrap();
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.share, config.share);
        assert_eq!(loaded.rpc, config.rpc);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config: NodeConfig = toml::from_str(&config_toml()).unwrap();
        config.threshold = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_chain() {
        let mut config: NodeConfig = toml::from_str(&config_toml()).unwrap();
        config
            .rpc
            .insert("dogechain".to_string(), Url::parse("https://x.test").unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::Chain(_))));
    }
}
