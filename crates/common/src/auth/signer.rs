use async_trait::async_trait;

use crate::crypto::{Address, WalletKey};
use crate::policy::ChainId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    /// The requester declined to sign
    #[error("signature request rejected: {0}")]
    Rejected(String),
    /// No signing capability could be reached
    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// A requester's signing capability, typically a wallet
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    /// Sign `challenge` as an EIP-191 personal message for `chain`
    async fn sign(&self, challenge: &[u8], chain: ChainId) -> Result<Vec<u8>, SignerError>;
}

/// Signs with a wallet key held in process memory
#[derive(Debug, Clone)]
pub struct LocalWallet {
    key: WalletKey,
}

impl LocalWallet {
    pub fn new(key: WalletKey) -> Self {
        Self { key }
    }

    pub fn random() -> Result<Self, crate::crypto::WalletError> {
        Ok(Self::new(WalletKey::generate()?))
    }

    pub fn key(&self) -> &WalletKey {
        &self.key
    }
}

#[async_trait]
impl Signer for LocalWallet {
    fn address(&self) -> Address {
        self.key.address()
    }

    async fn sign(&self, challenge: &[u8], _chain: ChainId) -> Result<Vec<u8>, SignerError> {
        Ok(self.key.sign_personal(challenge).to_vec())
    }
}
