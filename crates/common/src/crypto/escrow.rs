//! Policy-bound key escrow using threshold ECDH + AES Key Wrap
//!
//! # Protocol Overview
//!
//! To escrow a symmetric key under the network key `P = s·G`:
//! 1. **Generate ephemeral scalar** `r` and point `E = r·G`
//! 2. **Key agreement**: `Z = r·P`
//! 3. **Derive KEK**: `blake3::derive_key(ctx, Z || policy_digest || E)`
//! 4. **Wrap key**: AES-KW the symmetric key under the KEK
//! 5. **Bind**: a Schnorr proof of knowledge of `r` over the whole header,
//!    so `E` cannot be re-labelled with another policy digest
//!
//! To release, a threshold of nodes each check the binding proof and return
//! `s_i·E`; the client combines them into `Z = s·E` and re-derives the same
//! KEK. Nodes only answer for the digest `E` was bound to, so satisfying some
//! other policy never yields a share for this blob.

use std::convert::TryFrom;
use std::fmt;

use aes_kw::KekAes256 as Kek;
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::secret::{SecretError, SymmetricKey, KEY_SIZE};
use super::threshold::{
    decode_point, random_scalar, NetworkKey, ThresholdError, POINT_SIZE, SCALAR_SIZE,
};

/// Current blob layout version
pub const BLOB_VERSION: u8 = 1;
/// Size of the policy digest bound into the blob
pub const POLICY_DIGEST_SIZE: usize = 32;
/// Size of AES Key Wrap integrity block in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Size of the binding proof `(c, z)`
pub const BINDING_PROOF_SIZE: usize = 2 * SCALAR_SIZE;
/// Total size of an escrowed key blob in bytes
///
/// Layout: version (1) || policy_digest (32) || ephemeral_point (32) ||
/// proof (64) || wrapped_key (40) = 169 bytes
pub const ESCROWED_KEY_BLOB_SIZE: usize =
    1 + POLICY_DIGEST_SIZE + POINT_SIZE + BINDING_PROOF_SIZE + KEY_SIZE + KW_NONCE_SIZE;

const KEK_CONTEXT: &str = "warden 2025-01 escrow key-encryption-key";
const BINDING_CONTEXT: &str = "warden 2025-01 escrow policy binding";

const DIGEST_OFFSET: usize = 1;
const EPHEMERAL_OFFSET: usize = DIGEST_OFFSET + POLICY_DIGEST_SIZE;
const PROOF_OFFSET: usize = EPHEMERAL_OFFSET + POINT_SIZE;
const WRAPPED_OFFSET: usize = PROOF_OFFSET + BINDING_PROOF_SIZE;

/// Errors that can occur during escrow wrapping or unwrapping
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("escrow error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u8),
    #[error("threshold error: {0}")]
    Threshold(#[from] ThresholdError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    /// AES-KW integrity check failed: wrong shared point or policy
    #[error("key unwrap failed")]
    Unwrap,
    /// The header was not produced by whoever chose the ephemeral scalar
    #[error("blob binding proof is invalid")]
    Binding,
}

fn derive_kek(shared: &EdwardsPoint, digest: &[u8], ephemeral: &[u8]) -> Kek {
    let mut material = Vec::with_capacity(POINT_SIZE * 2 + POLICY_DIGEST_SIZE);
    material.extend_from_slice(&shared.compress().to_bytes());
    material.extend_from_slice(digest);
    material.extend_from_slice(ephemeral);
    let mut kek_bytes = blake3::derive_key(KEK_CONTEXT, &material);
    material.zeroize();
    let kek = Kek::from(kek_bytes);
    kek_bytes.zeroize();
    kek
}

/// Fiat-Shamir challenge over everything in the blob except the proof itself
fn binding_challenge(
    version: u8,
    digest: &[u8],
    ephemeral: &[u8],
    commitment: &EdwardsPoint,
    wrapped: &[u8],
) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(BINDING_CONTEXT);
    hasher.update(&[version]);
    hasher.update(digest);
    hasher.update(ephemeral);
    hasher.update(&commitment.compress().to_bytes());
    hasher.update(wrapped);
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn decode_scalar(bytes: &[u8]) -> Result<Scalar, EscrowError> {
    let bytes: [u8; SCALAR_SIZE] = bytes.try_into().map_err(|_| EscrowError::Binding)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes)).ok_or(EscrowError::Binding)
}

/// A symmetric key wrapped under the network key and bound to one policy
///
/// Opaque to the caller, who co-persists it with the ciphertext it unlocks.
///
/// # Wire Format
///
/// ```text
/// [ version: 1 ][ policy_digest: 32 ][ ephemeral_point: 32 ][ proof c, z: 64 ][ wrapped_key: 40 ]
/// ```
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct EscrowedKeyBlob(pub(crate) [u8; ESCROWED_KEY_BLOB_SIZE]);

impl fmt::Debug for EscrowedKeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EscrowedKeyBlob({})", &self.to_hex()[..16])
    }
}

impl Serialize for EscrowedKeyBlob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for EscrowedKeyBlob {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{Error, Visitor};

        struct BlobVisitor;

        impl<'de> Visitor<'de> for BlobVisitor {
            type Value = EscrowedKeyBlob;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex string or byte array of ESCROWED_KEY_BLOB_SIZE")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                EscrowedKeyBlob::from_hex(v).map_err(E::custom)
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: Error,
            {
                if v.len() != ESCROWED_KEY_BLOB_SIZE {
                    return Err(E::invalid_length(
                        v.len(),
                        &format!("expected {} bytes", ESCROWED_KEY_BLOB_SIZE).as_str(),
                    ));
                }
                let mut array = [0u8; ESCROWED_KEY_BLOB_SIZE];
                array.copy_from_slice(v);
                Ok(EscrowedKeyBlob(array))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                self.visit_bytes(&bytes)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BlobVisitor)
        } else {
            deserializer.deserialize_byte_buf(BlobVisitor)
        }
    }
}

impl TryFrom<&[u8]> for EscrowedKeyBlob {
    type Error = EscrowError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != ESCROWED_KEY_BLOB_SIZE {
            return Err(anyhow::anyhow!(
                "invalid blob size, expected {}, got {}",
                ESCROWED_KEY_BLOB_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut blob = [0u8; ESCROWED_KEY_BLOB_SIZE];
        blob.copy_from_slice(bytes);
        Ok(EscrowedKeyBlob(blob))
    }
}

impl EscrowedKeyBlob {
    /// Parse a blob from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, EscrowError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; ESCROWED_KEY_BLOB_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| anyhow::anyhow!("hex decode error"))?;
        Ok(EscrowedKeyBlob(buff))
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }

    /// The digest of the policy this blob was escrowed under
    pub fn policy_digest(&self) -> &[u8] {
        &self.0[DIGEST_OFFSET..EPHEMERAL_OFFSET]
    }

    /// Decode the ephemeral point nodes must multiply by their share
    pub fn ephemeral(&self) -> Result<EdwardsPoint, EscrowError> {
        if self.version() != BLOB_VERSION {
            return Err(EscrowError::UnsupportedVersion(self.version()));
        }
        Ok(decode_point(&self.0[EPHEMERAL_OFFSET..PROOF_OFFSET])?)
    }

    /// Check that the policy digest and ephemeral point were bound together
    /// by whoever chose `r`
    ///
    /// Verifies `z·G - c·E` hashes back to `c`. Any edit to the header or the
    /// wrapped key invalidates the proof, and producing a new one needs `r`.
    pub fn verify_binding(&self) -> Result<(), EscrowError> {
        let ephemeral = self.ephemeral()?;
        let c = decode_scalar(&self.0[PROOF_OFFSET..PROOF_OFFSET + SCALAR_SIZE])?;
        let z = decode_scalar(&self.0[PROOF_OFFSET + SCALAR_SIZE..WRAPPED_OFFSET])?;
        let commitment = EdwardsPoint::vartime_double_scalar_mul_basepoint(&-c, &ephemeral, &z);
        let expected = binding_challenge(
            self.version(),
            self.policy_digest(),
            &self.0[EPHEMERAL_OFFSET..PROOF_OFFSET],
            &commitment,
            &self.0[WRAPPED_OFFSET..],
        );
        if expected != c {
            return Err(EscrowError::Binding);
        }
        Ok(())
    }

    /// Wrap a symmetric key under the network key, bound to a policy digest
    pub fn wrap(
        key: &SymmetricKey,
        network_key: &NetworkKey,
        policy_digest: &[u8; POLICY_DIGEST_SIZE],
    ) -> Result<Self, EscrowError> {
        let mut r = random_scalar()?;
        let ephemeral = (ED25519_BASEPOINT_POINT * r).compress().to_bytes();
        let shared = network_key.point() * r;

        let kek = derive_kek(&shared, policy_digest, &ephemeral);
        let wrapped = kek
            .wrap_vec(key.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        if WRAPPED_OFFSET + wrapped.len() != ESCROWED_KEY_BLOB_SIZE {
            return Err(anyhow::anyhow!("expected blob size is incorrect").into());
        }

        let mut k = random_scalar()?;
        let commitment = ED25519_BASEPOINT_POINT * k;
        let c = binding_challenge(BLOB_VERSION, policy_digest, &ephemeral, &commitment, &wrapped);
        let z = k + c * r;
        k.zeroize();
        r.zeroize();

        let mut blob = [0u8; ESCROWED_KEY_BLOB_SIZE];
        blob[0] = BLOB_VERSION;
        blob[DIGEST_OFFSET..EPHEMERAL_OFFSET].copy_from_slice(policy_digest);
        blob[EPHEMERAL_OFFSET..PROOF_OFFSET].copy_from_slice(&ephemeral);
        blob[PROOF_OFFSET..PROOF_OFFSET + SCALAR_SIZE].copy_from_slice(c.as_bytes());
        blob[PROOF_OFFSET + SCALAR_SIZE..WRAPPED_OFFSET].copy_from_slice(z.as_bytes());
        blob[WRAPPED_OFFSET..].copy_from_slice(&wrapped);
        Ok(EscrowedKeyBlob(blob))
    }

    /// Unwrap the key given the combined shared point `s·E`
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Unwrap`] if the shared point or the policy digest
    /// differ from those used at wrap time.
    pub fn unwrap_key(
        &self,
        shared: &EdwardsPoint,
        policy_digest: &[u8; POLICY_DIGEST_SIZE],
    ) -> Result<SymmetricKey, EscrowError> {
        if self.version() != BLOB_VERSION {
            return Err(EscrowError::UnsupportedVersion(self.version()));
        }
        let kek = derive_kek(
            shared,
            policy_digest,
            &self.0[EPHEMERAL_OFFSET..PROOF_OFFSET],
        );
        let mut unwrapped = kek
            .unwrap_vec(&self.0[WRAPPED_OFFSET..])
            .map_err(|_| EscrowError::Unwrap)?;
        let key = SymmetricKey::from_slice(&unwrapped);
        unwrapped.zeroize();
        Ok(key?)
    }
}
