//! Ethereum wallet identities
//!
//! Requesters are identified by their Ethereum address and prove control of it
//! with EIP-191 `personal_sign` signatures over secp256k1.

use std::fmt;
use std::str::FromStr;

use ethers_core::utils::keccak256;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Size of an Ethereum address in bytes
pub const ADDRESS_SIZE: usize = 20;
/// Size of a secp256k1 private key in bytes
pub const WALLET_KEY_SIZE: usize = 32;
/// Size of a recoverable signature `r || s || v` in bytes
pub const SIGNATURE_SIZE: usize = 65;

const PEM_TAG: &str = "WARDEN WALLET KEY";

/// Errors that can occur during wallet key operations
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
}

/// A 20-byte Ethereum account address
///
/// Displays as lowercase `0x`-prefixed hex; parsing accepts any case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let uncompressed = public_key.serialize_uncompressed();
        // skip the 0x04 prefix, keep the low 20 bytes of the hash
        let hashed = keccak256(&uncompressed[1..]);
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&hashed[12..]);
        Address(address)
    }

    /// Whether a string is a well-formed `0x` + 40 hex address
    pub fn is_valid(candidate: &str) -> bool {
        Address::from_str(candidate).is_ok()
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| WalletError::InvalidAddress(s.to_string()))?;
        let mut buff = [0u8; ADDRESS_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| WalletError::InvalidAddress(s.to_string()))?;
        Ok(Address(buff))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// The EIP-191 digest of a message: keccak256("\x19Ethereum Signed Message:\n" + len + message)
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let prefixed = [prefix.as_bytes(), message].concat();
    keccak256(&prefixed)
}

/// Recover the address that produced a `personal_sign` signature
///
/// Accepts `v` as either 0/1 or the legacy 27/28.
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<Address, WalletError> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(WalletError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let mut rs = [0u8; 64];
    rs.copy_from_slice(&signature[..64]);
    let v = signature[64];
    let recovery_byte = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        _ => {
            return Err(WalletError::InvalidSignature(format!(
                "invalid recovery id {}",
                v
            )))
        }
    };

    let recovery_id = RecoveryId::try_from(recovery_byte as i32)?;
    let signature = RecoverableSignature::from_compact(&rs, recovery_id)?;
    let digest = Message::from_digest(personal_message_digest(message));
    let public_key = Secp256k1::new().recover_ecdsa(&digest, &signature)?;
    Ok(Address::from_public_key(&public_key))
}

/// A secp256k1 wallet key
///
/// # Security Considerations
///
/// - Never share this key over the network
/// - Persist only as PEM in the local state directory (e.g. `~/.warden/wallet.pem`)
#[derive(Clone)]
pub struct WalletKey(SecretKey);

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletKey({})", self.address())
    }
}

impl WalletKey {
    /// Generate a new random wallet key using a cryptographically secure RNG
    pub fn generate() -> Result<Self, WalletError> {
        loop {
            let mut bytes = [0u8; WALLET_KEY_SIZE];
            getrandom::getrandom(&mut bytes)
                .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
            // out-of-range values are astronomically rare; just draw again
            let key = SecretKey::from_slice(&bytes);
            bytes.zeroize();
            if let Ok(key) = key {
                return Ok(WalletKey(key));
            }
        }
    }

    /// Parse a wallet key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, WalletError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0u8; WALLET_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("wallet key hex decode error"))?;
        let key = SecretKey::from_slice(&buff);
        buff.zeroize();
        Ok(WalletKey(key?))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &self.0)
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public())
    }

    /// Produce an EIP-191 `personal_sign` signature: `r || s || v` with `v` in 27/28
    pub fn sign_personal(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let digest = Message::from_digest(personal_message_digest(message));
        let signature = Secp256k1::new().sign_ecdsa_recoverable(&digest, &self.0);
        let (recovery_id, rs) = signature.serialize_compact();

        let mut out = [0u8; SIGNATURE_SIZE];
        out[..64].copy_from_slice(&rs);
        out[64] = i32::from(recovery_id) as u8 + 27;
        out
    }

    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new(PEM_TAG, self.0.secret_bytes().to_vec());
        pem::encode(&pem)
    }

    pub fn from_pem(pem_str: &str) -> Result<Self, WalletError> {
        let pem = pem::parse(pem_str).map_err(|e| anyhow::anyhow!("failed to parse PEM: {}", e))?;
        if pem.tag() != PEM_TAG {
            return Err(anyhow::anyhow!("unexpected PEM tag: {}", pem.tag()).into());
        }
        Ok(WalletKey(SecretKey::from_slice(pem.contents())?))
    }
}
