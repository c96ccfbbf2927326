use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CustodyError;
use crate::auth::{AuthAssertion, Nonce};
use crate::crypto::{DecryptionShare, EscrowedKeyBlob, NetworkKey, SecretError, SymmetricKey};
use crate::policy::AccessPolicy;

pub const HANDSHAKE_PATH: &str = "/api/v0/handshake";
pub const CHALLENGE_PATH: &str = "/api/v0/challenge";
pub const ESCROW_PATH: &str = "/api/v0/escrow";
pub const RELEASE_PATH: &str = "/api/v0/release";

/// What a node announces about itself when a session is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Index of the key share this node holds, 1-based
    pub index: u8,
    pub network_key: NetworkKey,
    pub threshold: usize,
    pub nodes: usize,
    /// Domain assertions must be issued for
    pub domain: String,
}

/// A fresh nonce for the next assertion sent to this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub index: u8,
    pub nonce: Nonce,
}

/// Raw key material in transit to the escrowing node
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct KeyMaterial(String);

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

impl KeyMaterial {
    pub fn from_key(key: &SymmetricKey) -> Self {
        KeyMaterial(hex::encode(key.bytes()))
    }

    pub fn to_key(&self) -> Result<SymmetricKey, SecretError> {
        let mut bytes =
            hex::decode(&self.0).map_err(|_| anyhow::anyhow!("key material is not hex"))?;
        let key = SymmetricKey::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRequest {
    pub policy: AccessPolicy,
    pub key: KeyMaterial,
    pub assertion: AuthAssertion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowResponse {
    pub blob: EscrowedKeyBlob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub policy: AccessPolicy,
    pub blob: EscrowedKeyBlob,
    pub assertion: AuthAssertion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub share: DecryptionShare,
}

/// Body of every non-2xx node response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: CustodyError,
}
