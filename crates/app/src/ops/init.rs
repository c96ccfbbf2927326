use clap::Args;
use url::Url;

use common::auth::Signer;
use common::policy::ChainId;

use crate::state::{AppConfig, AppState, StateError, StoreConfig};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Domain the custody network issues assertions for
    #[arg(long, default_value = "warden.local")]
    pub domain: String,

    /// Base URL of a custody node; repeat for each node
    #[arg(long = "node")]
    pub nodes: Vec<Url>,

    /// Expected network key (hex); sessions with any other key are refused
    #[arg(long)]
    pub network_key: Option<String>,

    /// Chain the default policy is evaluated on
    #[arg(long, default_value = "ethereum")]
    pub chain: ChainId,

    /// Upper bound on any one encrypt or decrypt, in seconds
    #[arg(long, default_value = "60")]
    pub deadline_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            domain: self.domain.clone(),
            nodes: self.nodes.clone(),
            network_key: self.network_key.clone(),
            chain: self.chain,
            deadline_secs: self.deadline_secs,
            store: StoreConfig::Blobs,
        };

        let state = AppState::init(ctx.config_path.clone(), config)?;
        let address = state.load_wallet()?.address();

        let output = format!(
            "Initialized warden directory at: {}\n\
             - Wallet: {} ({})\n\
             - Blobs: {}\n\
             - Config: {}\n\
             - Custody nodes: {}",
            state.warden_dir.display(),
            state.wallet_path.display(),
            address,
            state.blobs_path.display(),
            state.config_path.display(),
            state.config.nodes.len(),
        );

        Ok(output)
    }
}
