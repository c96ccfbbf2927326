use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use common::auth::{AuthProvider, LocalWallet};
use common::crypto::{NetworkKey, WalletKey};
use common::custody::{HttpTransport, KeyCustodyClient};
use common::policy::ChainId;
use common::store::{BlobsContentStore, ContentStore, IpfsConfig, IpfsContentStore};
use common::workflow::EncryptionWorkflow;

pub const APP_NAME: &str = "warden";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const WALLET_FILE_NAME: &str = "wallet.pem";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Domain the custody network expects assertions for
    pub domain: String,
    /// Base URLs of every custody node
    #[serde(default)]
    pub nodes: Vec<Url>,
    /// Refuse custody networks announcing a different key
    #[serde(default)]
    pub network_key: Option<String>,
    /// Chain the default policy is evaluated on
    #[serde(default = "default_chain")]
    pub chain: ChainId,
    /// Upper bound on any one encrypt or decrypt, in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_chain() -> ChainId {
    ChainId::Ethereum
}

fn default_deadline_secs() -> u64 {
    60
}

/// Where uploaded content goes before its locator is encrypted
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Local iroh-blobs store (defaults to warden_dir/blobs/)
    #[default]
    Blobs,
    /// IPFS HTTP API, e.g. a pinning service
    Ipfs(IpfsConfig),
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the warden directory (~/.warden)
    pub warden_dir: PathBuf,
    pub wallet_path: PathBuf,
    pub blobs_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Get the warden directory path (custom or default ~/.warden)
    pub fn warden_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new warden state directory with a fresh wallet
    pub fn init(custom_path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let warden_dir = Self::warden_dir(custom_path)?;
        if warden_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&warden_dir)?;

        let blobs_path = warden_dir.join(BLOBS_DIR_NAME);
        fs::create_dir_all(&blobs_path)?;

        let wallet = WalletKey::generate().map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let wallet_path = warden_dir.join(WALLET_FILE_NAME);
        fs::write(&wallet_path, wallet.to_pem())?;

        let config_path = warden_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            warden_dir,
            wallet_path,
            blobs_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the warden directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let warden_dir = Self::warden_dir(custom_path)?;
        if !warden_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let wallet_path = warden_dir.join(WALLET_FILE_NAME);
        let blobs_path = warden_dir.join(BLOBS_DIR_NAME);
        let config_path = warden_dir.join(CONFIG_FILE_NAME);
        for (path, name) in [(&wallet_path, WALLET_FILE_NAME), (&config_path, CONFIG_FILE_NAME)] {
            if !path.exists() {
                return Err(StateError::MissingFile(name.to_string()));
            }
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        Ok(Self {
            warden_dir,
            wallet_path,
            blobs_path,
            config_path,
            config,
        })
    }

    pub fn load_wallet(&self) -> Result<LocalWallet, StateError> {
        let pem = fs::read_to_string(&self.wallet_path)?;
        let key = WalletKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        Ok(LocalWallet::new(key))
    }

    /// A workflow signing with this wallet against the configured nodes
    pub fn workflow(&self) -> Result<EncryptionWorkflow<HttpTransport, LocalWallet>, StateError> {
        if self.config.nodes.is_empty() {
            return Err(StateError::NoNodes);
        }
        let transport = HttpTransport::new(self.config.nodes.clone())
            .map_err(|e| StateError::Custody(e.to_string()))?;
        let client = match &self.config.network_key {
            Some(hex) => {
                let network_key = NetworkKey::from_hex(hex)
                    .map_err(|e| StateError::InvalidKey(e.to_string()))?;
                KeyCustodyClient::with_network_key(transport, network_key)
            }
            None => KeyCustodyClient::new(transport),
        };
        let auth = AuthProvider::new(self.load_wallet()?, &self.config.domain);
        Ok(EncryptionWorkflow::new(client, auth)
            .with_deadline(Duration::from_secs(self.config.deadline_secs)))
    }

    pub async fn content_store(&self) -> Result<Box<dyn ContentStore>, StateError> {
        let store: Box<dyn ContentStore> = match &self.config.store {
            StoreConfig::Blobs => Box::new(
                BlobsContentStore::fs(&self.blobs_path)
                    .await
                    .map_err(|e| StateError::Store(e.to_string()))?,
            ),
            StoreConfig::Ipfs(ipfs) => Box::new(
                IpfsContentStore::new(ipfs.clone())
                    .map_err(|e| StateError::Store(e.to_string()))?,
            ),
        };
        Ok(store)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("warden directory not initialized. Run 'warden init' first")]
    NotInitialized,

    #[error("warden directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("no custody nodes configured")]
    NoNodes,

    #[error("custody client error: {0}")]
    Custody(String),

    #[error("content store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
