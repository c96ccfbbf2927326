use std::collections::BTreeMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use url::Url;

use common::crypto::{deal, ThresholdError};
use common::custody::DEFAULT_MAX_SKEW_SECS;
use common::policy::ChainId;
use node::{ConfigError, NodeConfig};

/// Deal a fresh network key and write one config per custody node
#[derive(Args, Debug, Clone)]
pub struct Deal {
    /// Shares needed to release a key
    #[arg(long, default_value = "2")]
    pub threshold: usize,

    /// Number of custody nodes
    #[arg(long, default_value = "3")]
    pub nodes: usize,

    /// Domain requesters must issue their assertions for
    #[arg(long, default_value = "warden.local")]
    pub domain: String,

    /// Directory the node configs are written to
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Node i listens on base_port + i
    #[arg(long, default_value = "7000")]
    pub base_port: u16,

    /// JSON-RPC endpoint as chain=url; repeat per chain
    #[arg(long = "rpc")]
    pub rpc: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DealError {
    #[error("dealing failed: {0}")]
    Threshold(#[from] ThresholdError),
    #[error("invalid --rpc {0:?}, expected chain=url")]
    InvalidRpc(String),
    #[error("node config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Deal {
    fn rpc_endpoints(&self) -> Result<BTreeMap<String, Url>, DealError> {
        self.rpc
            .iter()
            .map(|entry| {
                let (chain, url) = entry
                    .split_once('=')
                    .ok_or_else(|| DealError::InvalidRpc(entry.clone()))?;
                let chain =
                    ChainId::from_str(chain).map_err(|_| DealError::InvalidRpc(entry.clone()))?;
                let url = Url::parse(url).map_err(|_| DealError::InvalidRpc(entry.clone()))?;
                Ok((chain.to_string(), url))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Deal {
    type Error = DealError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let rpc = self.rpc_endpoints()?;
        let (network_key, shares) = deal(self.threshold, self.nodes)?;
        fs::create_dir_all(&self.out)?;

        let mut lines = vec![
            format!("Dealt a {}-of-{} custody network", self.threshold, self.nodes),
            format!("- Network key: {}", network_key.to_hex()),
        ];
        for share in shares {
            let index = share.index();
            let port = self.base_port.saturating_add(u16::from(index) - 1);
            let config = NodeConfig {
                listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port),
                share: share.to_hex(),
                network_key: network_key.to_hex(),
                threshold: self.threshold,
                nodes: self.nodes,
                domain: self.domain.clone(),
                rpc: rpc.clone(),
                max_skew_secs: DEFAULT_MAX_SKEW_SECS,
                log_level: "info".to_string(),
                log_dir: None,
            };
            config.validate()?;

            let path = self.out.join(format!("node-{}.toml", index));
            config.save(&path)?;
            lines.push(format!("- Node {}: {} (port {})", index, path.display(), port));
        }

        tracing::info!(
            threshold = self.threshold,
            nodes = self.nodes,
            "wrote custody node configs"
        );
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::op::{Op, OpContext};

    fn deal_args(out: PathBuf) -> Deal {
        Deal {
            threshold: 2,
            nodes: 3,
            domain: "custody.test".to_string(),
            out,
            base_port: 7100,
            rpc: vec!["ethereum=https://rpc.example.com/".to_string()],
        }
    }

    #[tokio::test]
    async fn test_writes_loadable_configs() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let op = deal_args(temp_dir.path().to_path_buf());
        op.execute(&OpContext::new(None)).await.unwrap();

        let mut keys = Vec::new();
        for index in 1..=3u16 {
            let config = NodeConfig::load(&temp_dir.path().join(format!("node-{}.toml", index)))
                .unwrap();
            assert_eq!(config.listen_addr.port(), 7099 + index);
            assert_eq!(config.threshold, 2);
            assert!(config.rpc.contains_key("ethereum"));
            keys.push(config.network_key);
        }
        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn test_rejects_malformed_rpc() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut op = deal_args(temp_dir.path().to_path_buf());
        op.rpc = vec!["ethereum".to_string()];
        let err = op.execute(&OpContext::new(None)).await.unwrap_err();
        assert!(matches!(err, DealError::InvalidRpc(_)));
    }
}
