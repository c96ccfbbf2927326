use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{recover_signer, Address, SIGNATURE_SIZE};
use crate::policy::ChainId;

/// Longest validity window, in seconds, a node will accept for a single assertion
pub const MAX_ASSERTION_LIFETIME_SECS: i64 = 60 * 60;
/// Size of a node-issued challenge nonce in bytes
pub const NONCE_SIZE: usize = 16;

/// A single-use value a custody node hands out for the next assertion
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Nonce {
    pub fn random() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut bytes)?;
        Ok(Nonce(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; NONCE_SIZE];
        hex::decode_to_slice(encoded, &mut bytes)?;
        Ok(Nonce(bytes))
    }
}

impl Serialize for Nonce {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Nonce::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// The nonce one node issued, keyed by that node's share index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNonce {
    pub index: u8,
    pub nonce: Nonce,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AssertionError {
    #[error("assertion expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("assertion not valid until {0}")]
    NotYetValid(DateTime<Utc>),
    #[error("assertion lifetime is invalid")]
    InvalidLifetime,
    #[error("assertion issued for domain {found:?}, expected {expected:?}")]
    DomainMismatch { expected: String, found: String },
    #[error("assertion scoped to chain {found}, expected {expected}")]
    ChainMismatch { expected: ChainId, found: ChainId },
    #[error("bad signature: {0}")]
    BadSignature(String),
    #[error("assertion claims {claimed} but was signed by {recovered}")]
    SignerMismatch { claimed: Address, recovered: Address },
    #[error("signing rejected: {0}")]
    SigningRejected(String),
    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),
    #[error("assertion carries no nonce for node {0}")]
    MissingNonce(u8),
    /// Never issued by this node, already spent, or expired
    #[error("nonce unknown or already used")]
    UnknownNonce,
}

impl AssertionError {
    /// Whether issuing a fresh assertion can fix this
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssertionError::Expired(_)
                | AssertionError::NotYetValid(_)
                | AssertionError::SigningRejected(_)
                | AssertionError::SigningUnavailable(_)
                | AssertionError::UnknownNonce
        )
    }
}

/// The statement a requester signs to authenticate custody calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub domain: String,
    pub address: Address,
    pub chain: ChainId,
    /// One fresh nonce per node the assertion is meant for, ordered by index
    pub nonces: Vec<NodeNonce>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Render as an EIP-4361 style sign-in message
    pub fn message(&self) -> String {
        let nonces = self
            .nonces
            .iter()
            .map(|n| format!("{}:{}", n.index, n.nonce))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             Authorize key custody requests on {chain}.\n\
             \n\
             URI: warden://{domain}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonces}\n\
             Issued At: {issued_at}\n\
             Expiration Time: {expires_at}",
            domain = self.domain,
            address = self.address,
            chain = self.chain,
            chain_id = self.chain.numeric_id(),
            nonces = nonces,
            issued_at = self.issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            expires_at = self.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// A signed, time-bound, single-chain proof of who is calling
///
/// Issue a fresh one per custody call; never persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAssertion {
    pub signer_address: Address,
    pub chain: ChainId,
    pub nonces: Vec<NodeNonce>,
    /// `0x`-prefixed hex of the 65-byte `personal_sign` signature
    pub signature: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub domain: String,
}

impl AuthAssertion {
    pub fn challenge(&self) -> Challenge {
        Challenge {
            domain: self.domain.clone(),
            address: self.signer_address,
            chain: self.chain,
            nonces: self.nonces.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }

    /// The nonce addressed to the node holding share `index`
    pub fn nonce_for(&self, index: u8) -> Option<Nonce> {
        self.nonces
            .iter()
            .find(|n| n.index == index)
            .map(|n| n.nonce)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>, AssertionError> {
        let raw = self.signature.strip_prefix("0x").unwrap_or(&self.signature);
        let bytes = hex::decode(raw).map_err(|e| AssertionError::BadSignature(e.to_string()))?;
        if bytes.len() != SIGNATURE_SIZE {
            return Err(AssertionError::BadSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Check domain, validity window and signature
    ///
    /// `max_skew` tolerates clock drift between requester and verifier on
    /// both ends of the window.
    pub fn verify(
        &self,
        domain: &str,
        now: DateTime<Utc>,
        max_skew: Duration,
    ) -> Result<(), AssertionError> {
        if self.domain != domain {
            return Err(AssertionError::DomainMismatch {
                expected: domain.to_string(),
                found: self.domain.clone(),
            });
        }
        let lifetime = self.expires_at - self.issued_at;
        let max_lifetime = Duration::seconds(MAX_ASSERTION_LIFETIME_SECS);
        if lifetime <= Duration::zero() || lifetime > max_lifetime {
            return Err(AssertionError::InvalidLifetime);
        }
        if now - max_skew >= self.expires_at {
            return Err(AssertionError::Expired(self.expires_at));
        }
        if now + max_skew < self.issued_at {
            return Err(AssertionError::NotYetValid(self.issued_at));
        }

        let signature = self.signature_bytes()?;
        let message = self.challenge().message();
        let recovered = recover_signer(message.as_bytes(), &signature)
            .map_err(|e| AssertionError::BadSignature(e.to_string()))?;
        if recovered != self.signer_address {
            return Err(AssertionError::SignerMismatch {
                claimed: self.signer_address,
                recovered,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::WalletKey;

    fn nonces() -> Vec<NodeNonce> {
        (1..=2)
            .map(|index| NodeNonce {
                index,
                nonce: Nonce::random().unwrap(),
            })
            .collect()
    }

    fn signed(key: &WalletKey, issued_at: DateTime<Utc>, ttl: Duration) -> AuthAssertion {
        let challenge = Challenge {
            domain: "custody.test".to_string(),
            address: key.address(),
            chain: ChainId::Ethereum,
            nonces: nonces(),
            issued_at,
            expires_at: issued_at + ttl,
        };
        let signature = key.sign_personal(challenge.message().as_bytes());
        AuthAssertion {
            signer_address: key.address(),
            chain: challenge.chain,
            nonces: challenge.nonces,
            signature: format!("0x{}", hex::encode(signature)),
            issued_at: challenge.issued_at,
            expires_at: challenge.expires_at,
            domain: challenge.domain,
        }
    }

    #[test]
    fn test_message_is_deterministic() {
        let key = WalletKey::generate().unwrap();
        let now = Utc::now();
        let a = signed(&key, now, Duration::minutes(5));
        assert_eq!(a.challenge().message(), a.challenge().message());
        assert!(a.challenge().message().contains("Chain ID: 1"));
        assert!(a
            .challenge()
            .message()
            .contains(&key.address().to_string()));
        let nonce = a.nonce_for(2).unwrap();
        assert!(a.challenge().message().contains(&format!("2:{}", nonce)));
        assert_eq!(a.nonce_for(3), None);
    }

    #[test]
    fn test_verify_valid() {
        let key = WalletKey::generate().unwrap();
        let now = Utc::now();
        let assertion = signed(&key, now, Duration::minutes(5));
        assertion
            .verify("custody.test", now + Duration::minutes(1), Duration::zero())
            .unwrap();
    }

    #[test]
    fn test_verify_expired_and_future() {
        let key = WalletKey::generate().unwrap();
        let now = Utc::now();
        let assertion = signed(&key, now, Duration::minutes(5));

        let later = now + Duration::minutes(6);
        assert!(matches!(
            assertion.verify("custody.test", later, Duration::zero()),
            Err(AssertionError::Expired(_))
        ));
        // skew tolerance stretches the window
        assertion
            .verify("custody.test", later, Duration::minutes(2))
            .unwrap();

        let earlier = now - Duration::minutes(1);
        assert!(matches!(
            assertion.verify("custody.test", earlier, Duration::zero()),
            Err(AssertionError::NotYetValid(_))
        ));
    }

    #[test]
    fn test_verify_tampered_fields() {
        let key = WalletKey::generate().unwrap();
        let other = WalletKey::generate().unwrap();
        let now = Utc::now();

        let mut wrong_domain = signed(&key, now, Duration::minutes(5));
        assert!(matches!(
            wrong_domain.verify("elsewhere", now, Duration::zero()),
            Err(AssertionError::DomainMismatch { .. })
        ));
        // changing the domain after signing breaks the signature
        wrong_domain.domain = "elsewhere".to_string();
        assert!(matches!(
            wrong_domain.verify("elsewhere", now, Duration::zero()),
            Err(AssertionError::SignerMismatch { .. }) | Err(AssertionError::BadSignature(_))
        ));

        let mut impersonation = signed(&key, now, Duration::minutes(5));
        impersonation.signer_address = other.address();
        assert!(impersonation
            .verify("custody.test", now, Duration::zero())
            .is_err());

        let mut swapped_nonces = signed(&key, now, Duration::minutes(5));
        swapped_nonces.nonces = nonces();
        assert!(swapped_nonces
            .verify("custody.test", now, Duration::zero())
            .is_err());

        let mut truncated = signed(&key, now, Duration::minutes(5));
        truncated.signature.truncate(20);
        assert!(matches!(
            truncated.verify("custody.test", now, Duration::zero()),
            Err(AssertionError::BadSignature(_))
        ));

        let too_long = signed(&key, now, Duration::days(2));
        assert_eq!(
            too_long.verify("custody.test", now, Duration::zero()),
            Err(AssertionError::InvalidLifetime)
        );
    }

    #[test]
    fn test_json_roundtrip_preserves_signature_validity() {
        let key = WalletKey::generate().unwrap();
        let now = Utc::now();
        let assertion = signed(&key, now, Duration::minutes(5));
        let json = serde_json::to_string(&assertion).unwrap();
        assert!(json.contains("signerAddress"));
        let back: AuthAssertion = serde_json::from_str(&json).unwrap();
        back.verify("custody.test", now, Duration::zero()).unwrap();
    }
}
