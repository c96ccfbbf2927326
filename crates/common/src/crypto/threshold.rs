//! Threshold key material for the custody network
//!
//! The network holds a single Curve25519 scalar `s` that nobody ever sees in
//! one piece. A dealer splits it with Shamir secret sharing into `n` shares,
//! any `t` of which are enough to act on it. Nodes never reconstruct `s`:
//! each answers a release request with `s_i·E` for the blob's ephemeral point
//! `E`, and the client interpolates those points at zero to obtain `s·E`.

use std::collections::HashSet;
use std::fmt;

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a compressed Edwards point in bytes
pub const POINT_SIZE: usize = 32;
/// Size of a canonical scalar encoding in bytes
pub const SCALAR_SIZE: usize = 32;
/// Upper bound on the number of custody nodes
pub const MAX_NODES: usize = 255;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("invalid threshold {threshold} of {nodes} nodes")]
    InvalidThreshold { threshold: usize, nodes: usize },
    #[error("not enough decryption shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },
    #[error("duplicate share index {0}")]
    DuplicateIndex(u8),
    #[error("share index must be non-zero")]
    ZeroIndex,
    #[error("invalid point encoding")]
    InvalidPoint,
    #[error("invalid scalar encoding")]
    InvalidScalar,
    #[error("hex decode error")]
    Hex,
    #[error("random number generator failure: {0}")]
    Rng(String),
}

/// Draw a uniformly random, non-zero scalar
pub(crate) fn random_scalar() -> Result<Scalar, ThresholdError> {
    loop {
        let mut wide = [0u8; 64];
        getrandom::getrandom(&mut wide).map_err(|e| ThresholdError::Rng(e.to_string()))?;
        let scalar = Scalar::from_bytes_mod_order_wide(&wide);
        wide.zeroize();
        if scalar != Scalar::ZERO {
            return Ok(scalar);
        }
    }
}

pub(crate) fn decode_point(bytes: &[u8]) -> Result<EdwardsPoint, ThresholdError> {
    let point = CompressedEdwardsY::from_slice(bytes)
        .map_err(|_| ThresholdError::InvalidPoint)?
        .decompress()
        .ok_or(ThresholdError::InvalidPoint)?;
    if point.is_small_order() {
        return Err(ThresholdError::InvalidPoint);
    }
    Ok(point)
}

fn decode_hex_array<const N: usize>(hex: &str) -> Result<[u8; N], ThresholdError> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let mut buff = [0u8; N];
    hex::decode_to_slice(hex, &mut buff).map_err(|_| ThresholdError::Hex)?;
    Ok(buff)
}

/// The network's public key, `s·G`
///
/// Anyone may wrap a key under it; only a threshold of nodes can unwrap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkKey(EdwardsPoint);

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkKey({})", self.to_hex())
    }
}

impl NetworkKey {
    pub fn point(&self) -> &EdwardsPoint {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; POINT_SIZE] {
        self.0.compress().to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(hex: &str) -> Result<Self, ThresholdError> {
        let bytes: [u8; POINT_SIZE] = decode_hex_array(hex)?;
        Ok(NetworkKey(decode_point(&bytes)?))
    }
}

impl Serialize for NetworkKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NetworkKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        NetworkKey::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// One node's share of the network scalar, `(i, f(i))`
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    #[zeroize(skip)]
    index: u8,
    scalar: Scalar,
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("index", &self.index)
            .field("scalar", &"<redacted>")
            .finish()
    }
}

impl KeyShare {
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Compute this node's decryption share for an ephemeral point
    pub fn decryption_share(&self, ephemeral: &EdwardsPoint) -> DecryptionShare {
        DecryptionShare {
            index: self.index,
            point: ephemeral * self.scalar,
        }
    }

    /// Encode as `index:scalar` hex, the format used in node configuration
    pub fn to_hex(&self) -> String {
        format!("{:02x}:{}", self.index, hex::encode(self.scalar.to_bytes()))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, ThresholdError> {
        let (index, scalar) = encoded.split_once(':').ok_or(ThresholdError::Hex)?;
        let index: [u8; 1] = decode_hex_array(index)?;
        let mut bytes: [u8; SCALAR_SIZE] = decode_hex_array(scalar)?;
        let scalar: Option<Scalar> = Scalar::from_canonical_bytes(bytes).into();
        bytes.zeroize();
        let scalar = scalar.ok_or(ThresholdError::InvalidScalar)?;
        if index[0] == 0 {
            return Err(ThresholdError::ZeroIndex);
        }
        Ok(KeyShare {
            index: index[0],
            scalar,
        })
    }
}

/// A node's answer to a release request, `s_i·E`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecryptionShare {
    index: u8,
    point: EdwardsPoint,
}

impl DecryptionShare {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn to_hex(&self) -> String {
        format!(
            "{:02x}:{}",
            self.index,
            hex::encode(self.point.compress().to_bytes())
        )
    }

    pub fn from_hex(encoded: &str) -> Result<Self, ThresholdError> {
        let (index, point) = encoded.split_once(':').ok_or(ThresholdError::Hex)?;
        let index: [u8; 1] = decode_hex_array(index)?;
        if index[0] == 0 {
            return Err(ThresholdError::ZeroIndex);
        }
        let bytes: [u8; POINT_SIZE] = decode_hex_array(point)?;
        Ok(DecryptionShare {
            index: index[0],
            point: decode_point(&bytes)?,
        })
    }
}

impl Serialize for DecryptionShare {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DecryptionShare {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        DecryptionShare::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Split a fresh network scalar into `nodes` shares with the given threshold
///
/// Returns the network public key alongside the shares. The scalar itself is
/// dropped before returning.
pub fn deal(threshold: usize, nodes: usize) -> Result<(NetworkKey, Vec<KeyShare>), ThresholdError> {
    if threshold == 0 || threshold > nodes || nodes > MAX_NODES {
        return Err(ThresholdError::InvalidThreshold { threshold, nodes });
    }

    // f(x) = s + a_1 x + ... + a_{t-1} x^{t-1}
    let mut coefficients = Vec::with_capacity(threshold);
    for _ in 0..threshold {
        coefficients.push(random_scalar()?);
    }
    let network_key = NetworkKey(ED25519_BASEPOINT_POINT * coefficients[0]);

    let shares = (1..=nodes)
        .map(|i| {
            let x = Scalar::from(i as u64);
            // Horner evaluation from the highest coefficient down
            let scalar = coefficients
                .iter()
                .rev()
                .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient);
            KeyShare {
                index: i as u8,
                scalar,
            }
        })
        .collect();

    coefficients.zeroize();
    Ok((network_key, shares))
}

/// Lagrange coefficient for `index` over the set `indices`, evaluated at zero
fn lagrange_at_zero(index: u8, indices: &[u8]) -> Scalar {
    let xi = Scalar::from(index as u64);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for &other in indices.iter().filter(|&&j| j != index) {
        let xj = Scalar::from(other as u64);
        numerator *= xj;
        denominator *= xj - xi;
    }
    numerator * denominator.invert()
}

/// Combine `threshold` decryption shares into `s·E`
///
/// Only the first `threshold` shares are used; extra shares are ignored.
pub fn combine(shares: &[DecryptionShare], threshold: usize) -> Result<EdwardsPoint, ThresholdError> {
    if threshold == 0 || shares.len() < threshold {
        return Err(ThresholdError::NotEnoughShares {
            have: shares.len(),
            need: threshold,
        });
    }
    let selected = &shares[..threshold];

    let mut seen = HashSet::with_capacity(threshold);
    for share in selected {
        if share.index == 0 {
            return Err(ThresholdError::ZeroIndex);
        }
        if !seen.insert(share.index) {
            return Err(ThresholdError::DuplicateIndex(share.index));
        }
    }

    let indices: Vec<u8> = selected.iter().map(|s| s.index).collect();
    let combined = selected
        .iter()
        .map(|share| share.point * lagrange_at_zero(share.index, &indices))
        .fold(EdwardsPoint::default(), |acc, point| acc + point);

    if combined.is_identity() {
        return Err(ThresholdError::InvalidPoint);
    }
    Ok(combined)
}

#[cfg(test)]
mod test {
    use super::*;

    fn ephemeral() -> (Scalar, EdwardsPoint) {
        let r = random_scalar().unwrap();
        (r, ED25519_BASEPOINT_POINT * r)
    }

    #[test]
    fn test_any_threshold_subset_recovers_shared_point() {
        let (network_key, shares) = deal(3, 5).unwrap();
        let (r, e) = ephemeral();
        let expected = network_key.point() * r;

        let partials: Vec<_> = shares.iter().map(|s| s.decryption_share(&e)).collect();
        for subset in [[0, 1, 2], [0, 2, 4], [1, 3, 4], [4, 2, 0]] {
            let chosen: Vec<_> = subset.iter().map(|&i| partials[i]).collect();
            assert_eq!(combine(&chosen, 3).unwrap(), expected);
        }
    }

    #[test]
    fn test_below_threshold_is_rejected() {
        let (_, shares) = deal(3, 5).unwrap();
        let (_, e) = ephemeral();
        let partials: Vec<_> = shares.iter().take(2).map(|s| s.decryption_share(&e)).collect();
        assert_eq!(
            combine(&partials, 3),
            Err(ThresholdError::NotEnoughShares { have: 2, need: 3 })
        );
    }

    #[test]
    fn test_wrong_subset_size_gives_wrong_point() {
        // interpolating over t-1 shares of a degree t-1 polynomial is not s·E
        let (network_key, shares) = deal(3, 5).unwrap();
        let (r, e) = ephemeral();
        let partials: Vec<_> = shares.iter().take(2).map(|s| s.decryption_share(&e)).collect();
        assert_ne!(combine(&partials, 2).unwrap(), network_key.point() * r);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let (_, shares) = deal(2, 3).unwrap();
        let (_, e) = ephemeral();
        let share = shares[0].decryption_share(&e);
        assert_eq!(
            combine(&[share, share], 2),
            Err(ThresholdError::DuplicateIndex(1))
        );
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(deal(0, 3).is_err());
        assert!(deal(4, 3).is_err());
        assert!(deal(2, 256).is_err());
        assert!(deal(1, 1).is_ok());
    }

    #[test]
    fn test_share_hex_roundtrip_preserves_behavior() {
        let (network_key, shares) = deal(2, 2).unwrap();
        let restored: Vec<_> = shares
            .iter()
            .map(|s| KeyShare::from_hex(&s.to_hex()).unwrap())
            .collect();
        let (r, e) = ephemeral();
        let partials: Vec<_> = restored.iter().map(|s| s.decryption_share(&e)).collect();
        assert_eq!(combine(&partials, 2).unwrap(), network_key.point() * r);

        let key = NetworkKey::from_hex(&network_key.to_hex()).unwrap();
        assert_eq!(key, network_key);
    }

    #[test]
    fn test_key_share_debug_is_redacted() {
        let (_, shares) = deal(1, 1).unwrap();
        let rendered = format!("{:?}", shares[0]);
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains(&shares[0].to_hex()[3..]));
    }

    #[test]
    fn test_zero_index_share_rejected() {
        let encoded = format!("00:{}", hex::encode([1u8; 32]));
        assert_eq!(KeyShare::from_hex(&encoded).unwrap_err(), ThresholdError::ZeroIndex);
    }
}
