//! Locator encryption using ChaCha20-Poly1305
//!
//! Every encryption operation gets its own `SymmetricKey`. The key lives only
//! in process memory: it is generated, used once to encrypt, handed to the
//! custody network for escrow and then dropped. Dropping zeroes the bytes.

use std::fmt;

use chacha20poly1305::Key;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;
/// Size of BLAKE3 hash in bytes (256 bits)
pub const BLAKE3_HASH_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    /// The ciphertext did not authenticate under this key, or the
    ///  embedded plaintext hash did not match
    #[error("integrity check failed: {0}")]
    Integrity(String),
}

/// A 256-bit symmetric key for locator encryption
///
/// The encrypted format is: `nonce (12 bytes) || encrypted(hash(32 bytes) || plaintext) || tag (16 bytes)`.
/// The BLAKE3 hash of the plaintext is prepended before encryption so that a key
/// recovered from the wrong blob can never yield silently-wrong plaintext.
///
/// The key is not `Clone` or `Serialize`; the only way its bytes
/// leave this type is through [`SymmetricKey::bytes`] on the way into escrow.
#[derive(PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        SymmetricKey(bytes)
    }
}

impl SymmetricKey {
    /// Generate a new random key using a cryptographically secure RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; KEY_SIZE];
        getrandom::getrandom(&mut buff)
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
        Ok(Self(buff))
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid key size, expected {}, got {}",
                KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Get a reference to the key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Encrypt data using ChaCha20-Poly1305 AEAD
    ///
    /// A BLAKE3 hash of the plaintext is prepended before encryption and a
    /// random nonce is generated for each call, so encrypting the same data
    /// twice never yields the same ciphertext.
    pub fn encrypt(&self, data: &[u8]) -> Result<Ciphertext, SecretError> {
        let plaintext_hash = blake3::hash(data);

        let mut data_with_hash = Vec::with_capacity(BLAKE3_HASH_SIZE + data.len());
        data_with_hash.extend_from_slice(plaintext_hash.as_bytes());
        data_with_hash.extend_from_slice(data);

        let key = Key::from_slice(self.bytes());
        let cipher = ChaCha20Poly1305::new(key);

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted = cipher
            .encrypt(nonce, data_with_hash.as_ref())
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;
        data_with_hash.zeroize();

        let mut out = Vec::with_capacity(NONCE_SIZE + encrypted.len());
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(encrypted.as_ref());

        Ok(Ciphertext(out))
    }

    /// Decrypt a ciphertext produced by [`SymmetricKey::encrypt`]
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Integrity`] if:
    /// - Data is too short to contain a nonce and tag
    /// - Authentication tag verification fails (wrong key or tampered data)
    /// - Hash verification fails
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<u8>, SecretError> {
        let data = ciphertext.bytes();
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretError::Integrity(
                "ciphertext too short for nonce and tag".to_string(),
            ));
        }

        let key = Key::from_slice(self.bytes());
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let cipher = ChaCha20Poly1305::new(key);
        let mut decrypted = cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| SecretError::Integrity("authentication tag mismatch".to_string()))?;

        if decrypted.len() < BLAKE3_HASH_SIZE {
            decrypted.zeroize();
            return Err(SecretError::Integrity(
                "decrypted data too short for hash header".to_string(),
            ));
        }

        let plaintext = decrypted[BLAKE3_HASH_SIZE..].to_vec();
        let hash_ok = blake3::hash(&plaintext).as_bytes() == &decrypted[..BLAKE3_HASH_SIZE];
        decrypted.zeroize();
        if !hash_ok {
            return Err(SecretError::Integrity(
                "plaintext hash verification failed".to_string(),
            ));
        }

        Ok(plaintext)
    }
}

/// Symmetric encryption of a locator string
///
/// Always paired 1:1 with the `EscrowedKeyBlob` holding its key. Serializes
/// as a hex string so records stay readable.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ciphertext(Vec<u8>);

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Ciphertext {
    fn from(bytes: Vec<u8>) -> Self {
        Ciphertext(bytes)
    }
}

impl Ciphertext {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a ciphertext from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex).map_err(|_| anyhow::anyhow!("ciphertext hex decode error"))?;
        Ok(Ciphertext(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Serialize for Ciphertext {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Ciphertext::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}
