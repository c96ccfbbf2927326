//! Authentication assertions for custody calls
//!
//! Every escrow and release request carries an [`AuthAssertion`]: the
//! requester's signature over a short-lived, chain-scoped [`Challenge`] that
//! embeds one single-use [`Nonce`] per custody node. Nodes spend their nonce
//! when they accept the assertion, so a captured assertion cannot be replayed.
//! Custody nodes recover the signer from it and substitute that address into
//! the policy being evaluated.

mod assertion;
mod signer;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::crypto::{recover_signer, Address};
use crate::policy::ChainId;

pub use assertion::{
    AssertionError, AuthAssertion, Challenge, NodeNonce, Nonce, MAX_ASSERTION_LIFETIME_SECS,
    NONCE_SIZE,
};
pub use signer::{LocalWallet, Signer, SignerError};

/// Default assertion validity, in seconds
pub const DEFAULT_ASSERTION_TTL_SECS: i64 = 5 * 60;

impl From<SignerError> for AssertionError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Rejected(reason) => AssertionError::SigningRejected(reason),
            SignerError::Unavailable(reason) => AssertionError::SigningUnavailable(reason),
        }
    }
}

/// Issues fresh assertions from a signer
///
/// Nothing is cached: each call prompts the signer again.
#[derive(Debug)]
pub struct AuthProvider<S> {
    signer: Arc<S>,
    domain: String,
    ttl: Duration,
}

impl<S> Clone for AuthProvider<S> {
    fn clone(&self) -> Self {
        Self {
            signer: self.signer.clone(),
            domain: self.domain.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: Signer> AuthProvider<S> {
    pub fn new(signer: S, domain: impl Into<String>) -> Self {
        Self {
            signer: Arc::new(signer),
            domain: domain.into(),
            ttl: Duration::seconds(DEFAULT_ASSERTION_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Sign a fresh assertion over the nonces the custody nodes handed out
    pub async fn issue(
        &self,
        chain: ChainId,
        nonces: &[NodeNonce],
    ) -> Result<AuthAssertion, AssertionError> {
        self.issue_at(chain, nonces, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        chain: ChainId,
        nonces: &[NodeNonce],
        issued_at: DateTime<Utc>,
    ) -> Result<AuthAssertion, AssertionError> {
        let address = self.signer.address();
        let mut nonces = nonces.to_vec();
        nonces.sort_by_key(|n| n.index);
        nonces.dedup_by_key(|n| n.index);
        let challenge = Challenge {
            domain: self.domain.clone(),
            address,
            chain,
            nonces,
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        let message = challenge.message();

        tracing::debug!(%address, %chain, "requesting assertion signature");
        let signature = self.signer.sign(message.as_bytes(), chain).await?;

        // a misbehaving signer should fail here, not at every custody node
        let recovered = recover_signer(message.as_bytes(), &signature)
            .map_err(|e| AssertionError::BadSignature(e.to_string()))?;
        if recovered != address {
            return Err(AssertionError::SignerMismatch {
                claimed: address,
                recovered,
            });
        }

        Ok(AuthAssertion {
            signer_address: address,
            chain,
            nonces: challenge.nonces,
            signature: format!("0x{}", hex::encode(&signature)),
            issued_at: challenge.issued_at,
            expires_at: challenge.expires_at,
            domain: challenge.domain,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSigner {
        wallet: LocalWallet,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Signer for CountingSigner {
        fn address(&self) -> Address {
            self.wallet.address()
        }

        async fn sign(&self, challenge: &[u8], chain: ChainId) -> Result<Vec<u8>, SignerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.wallet.sign(challenge, chain).await
        }
    }

    fn nonces() -> Vec<NodeNonce> {
        [3u8, 1, 2]
            .into_iter()
            .map(|index| NodeNonce {
                index,
                nonce: Nonce::random().unwrap(),
            })
            .collect()
    }

    struct DecliningSigner(Address);

    #[async_trait]
    impl Signer for DecliningSigner {
        fn address(&self) -> Address {
            self.0
        }

        async fn sign(&self, _: &[u8], _: ChainId) -> Result<Vec<u8>, SignerError> {
            Err(SignerError::Rejected("user closed the wallet prompt".to_string()))
        }
    }

    #[tokio::test]
    async fn test_issue_verifies() {
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), "custody.test");
        let nonces = nonces();
        let assertion = provider.issue(ChainId::Ethereum, &nonces).await.unwrap();
        assert_eq!(assertion.signer_address, provider.address());
        let indices: Vec<u8> = assertion.nonces.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(assertion.nonce_for(3), Some(nonces[0].nonce));
        assert_eq!(
            assertion.expires_at - assertion.issued_at,
            Duration::seconds(DEFAULT_ASSERTION_TTL_SECS)
        );
        assertion
            .verify("custody.test", Utc::now(), Duration::zero())
            .unwrap();
    }

    #[tokio::test]
    async fn test_every_issue_signs_again() {
        let provider = AuthProvider::new(
            CountingSigner {
                wallet: LocalWallet::random().unwrap(),
                calls: AtomicUsize::new(0),
            },
            "custody.test",
        );
        provider.issue(ChainId::Ethereum, &nonces()).await.unwrap();
        provider.issue(ChainId::Ethereum, &nonces()).await.unwrap();
        assert_eq!(provider.signer().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_signing() {
        let address = LocalWallet::random().unwrap().address();
        let provider = AuthProvider::new(DecliningSigner(address), "custody.test");
        let err = provider.issue(ChainId::Ethereum, &nonces()).await.unwrap_err();
        assert!(matches!(err, AssertionError::SigningRejected(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_issue_at_past_time_is_expired() {
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), "custody.test")
            .with_ttl(Duration::seconds(30));
        let assertion = provider
            .issue_at(ChainId::Polygon, &nonces(), Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert!(assertion.is_expired_at(Utc::now()));
        assert!(matches!(
            assertion.verify("custody.test", Utc::now(), Duration::zero()),
            Err(AssertionError::Expired(_))
        ));
    }
}
