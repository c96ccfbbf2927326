use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::messages::{
    ChallengeResponse, EscrowRequest, EscrowResponse, NodeInfo, ReleaseRequest, ReleaseResponse,
};
use super::nonces::NonceStore;
use super::CustodyError;
use crate::auth::{AssertionError, AuthAssertion};
use crate::crypto::{EscrowedKeyBlob, KeyShare, NetworkKey, BLOB_VERSION};
use crate::oracle::{ChainStateOracle, OracleError, StateQuery};
use crate::policy::AccessPolicy;

/// Default tolerated clock drift between requesters and nodes, in seconds
pub const DEFAULT_MAX_SKEW_SECS: i64 = 30;

/// One member of the custody network
///
/// Holds a single share of the network scalar and answers escrow and release
/// requests. Release is gated on evaluating the policy against live chain
/// state for the address that signed the request's assertion.
#[derive(Clone)]
pub struct CustodyNode {
    share: KeyShare,
    network_key: NetworkKey,
    threshold: usize,
    nodes: usize,
    domain: String,
    oracle: Arc<dyn ChainStateOracle>,
    max_skew: Duration,
    nonces: NonceStore,
}

impl fmt::Debug for CustodyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyNode")
            .field("index", &self.share.index())
            .field("network_key", &self.network_key)
            .field("threshold", &self.threshold)
            .field("nodes", &self.nodes)
            .field("domain", &self.domain)
            .finish()
    }
}

impl CustodyNode {
    pub fn new(
        share: KeyShare,
        network_key: NetworkKey,
        threshold: usize,
        nodes: usize,
        domain: impl Into<String>,
        oracle: Arc<dyn ChainStateOracle>,
    ) -> Self {
        Self {
            share,
            network_key,
            threshold,
            nodes,
            domain: domain.into(),
            oracle,
            max_skew: Duration::seconds(DEFAULT_MAX_SKEW_SECS),
            nonces: NonceStore::default(),
        }
    }

    pub fn with_max_skew(mut self, max_skew: Duration) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn with_nonce_store(mut self, nonces: NonceStore) -> Self {
        self.nonces = nonces;
        self
    }

    pub fn index(&self) -> u8 {
        self.share.index()
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            index: self.share.index(),
            network_key: self.network_key,
            threshold: self.threshold,
            nodes: self.nodes,
            domain: self.domain.clone(),
        }
    }

    /// Hand out a nonce for the requester's next assertion
    pub fn challenge(&self) -> Result<ChallengeResponse, CustodyError> {
        self.challenge_at(Utc::now())
    }

    pub fn challenge_at(&self, now: DateTime<Utc>) -> Result<ChallengeResponse, CustodyError> {
        Ok(ChallengeResponse {
            index: self.share.index(),
            nonce: self.nonces.issue_at(now)?,
        })
    }

    /// Verify the assertion, then spend the nonce it carries for this node
    fn check_assertion(
        &self,
        assertion: &AuthAssertion,
        policy: &AccessPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), CustodyError> {
        assertion.verify(&self.domain, now, self.max_skew)?;
        if assertion.chain != policy.chain() {
            return Err(AssertionError::ChainMismatch {
                expected: policy.chain(),
                found: assertion.chain,
            }
            .into());
        }
        let nonce = assertion
            .nonce_for(self.share.index())
            .ok_or(AssertionError::MissingNonce(self.share.index()))?;
        if !self.nonces.consume_at(&nonce, now) {
            tracing::warn!(
                node = self.share.index(),
                requester = %assertion.signer_address,
                "assertion nonce unknown or already spent"
            );
            return Err(AssertionError::UnknownNonce.into());
        }
        Ok(())
    }

    pub fn escrow(&self, request: &EscrowRequest) -> Result<EscrowResponse, CustodyError> {
        self.escrow_at(request, Utc::now())
    }

    pub fn escrow_at(
        &self,
        request: &EscrowRequest,
        now: DateTime<Utc>,
    ) -> Result<EscrowResponse, CustodyError> {
        request
            .policy
            .validate()
            .map_err(|e| CustodyError::EscrowRejected(e.to_string()))?;
        self.check_assertion(&request.assertion, &request.policy, now)?;

        let key = request
            .key
            .to_key()
            .map_err(|e| CustodyError::EscrowRejected(e.to_string()))?;
        let blob = EscrowedKeyBlob::wrap(&key, &self.network_key, &request.policy.digest())
            .map_err(|e| CustodyError::EscrowRejected(e.to_string()))?;

        tracing::info!(
            node = self.share.index(),
            requester = %request.assertion.signer_address,
            chain = %request.policy.chain(),
            "escrowed key"
        );
        Ok(EscrowResponse { blob })
    }

    pub async fn release(&self, request: &ReleaseRequest) -> Result<ReleaseResponse, CustodyError> {
        self.release_at(request, Utc::now()).await
    }

    pub async fn release_at(
        &self,
        request: &ReleaseRequest,
        now: DateTime<Utc>,
    ) -> Result<ReleaseResponse, CustodyError> {
        let policy = &request.policy;
        let blob = &request.blob;
        policy.validate()?;

        if blob.version() != BLOB_VERSION {
            return Err(CustodyError::Integrity(format!(
                "unsupported blob version {}",
                blob.version()
            )));
        }
        blob.verify_binding()
            .map_err(|e| CustodyError::Integrity(e.to_string()))?;
        if blob.policy_digest() != policy.digest().as_slice() {
            return Err(CustodyError::PolicyMismatch);
        }
        self.check_assertion(&request.assertion, policy, now)?;

        let requester = request.assertion.signer_address;
        let query = StateQuery::for_policy(policy, &requester);
        let observed = self.oracle.query(&query).await.map_err(|e| match e {
            OracleError::UnsupportedMethod { .. } | OracleError::InvalidQuery(_) => {
                CustodyError::Unevaluable(e.to_string())
            }
            other => CustodyError::Network(format!("chain state unavailable: {}", other)),
        })?;

        if !policy.return_value_test().holds(&observed)? {
            tracing::warn!(
                node = self.share.index(),
                %requester,
                chain = %policy.chain(),
                method = policy.method(),
                "policy not satisfied"
            );
            return Err(CustodyError::PolicyNotSatisfied);
        }

        let ephemeral = blob
            .ephemeral()
            .map_err(|e| CustodyError::Integrity(e.to_string()))?;
        tracing::debug!(node = self.share.index(), %requester, "releasing decryption share");
        Ok(ReleaseResponse {
            share: self.share.decryption_share(&ephemeral),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auth::{AuthProvider, LocalWallet, NodeNonce};
    use crate::crypto::{combine, deal, SymmetricKey};
    use crate::custody::messages::KeyMaterial;
    use crate::oracle::MemoryOracle;
    use crate::policy::ChainId;
    use ethers_core::types::U256;

    const DOMAIN: &str = "custody.test";

    fn network(oracle: &MemoryOracle) -> Vec<CustodyNode> {
        let (network_key, shares) = deal(2, 3).unwrap();
        shares
            .into_iter()
            .map(|share| {
                CustodyNode::new(share, network_key, 2, 3, DOMAIN, Arc::new(oracle.clone()))
            })
            .collect()
    }

    fn nonces(nodes: &[CustodyNode]) -> Vec<NodeNonce> {
        nodes
            .iter()
            .map(|node| {
                let challenge = node.challenge().unwrap();
                NodeNonce {
                    index: challenge.index,
                    nonce: challenge.nonce,
                }
            })
            .collect()
    }

    async fn assertion(
        provider: &AuthProvider<LocalWallet>,
        nodes: &[CustodyNode],
        chain: ChainId,
    ) -> AuthAssertion {
        provider.issue(chain, &nonces(nodes)).await.unwrap()
    }

    async fn escrow(
        nodes: &[CustodyNode],
        provider: &AuthProvider<LocalWallet>,
        policy: &AccessPolicy,
        key: &SymmetricKey,
    ) -> EscrowedKeyBlob {
        let request = EscrowRequest {
            policy: policy.clone(),
            key: KeyMaterial::from_key(key),
            assertion: assertion(provider, &nodes[..1], policy.chain()).await,
        };
        nodes[0].escrow(&request).unwrap().blob
    }

    #[tokio::test]
    async fn test_release_requires_policy() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "1000").unwrap();
        let key = SymmetricKey::generate().unwrap();
        let blob = escrow(&nodes, &provider, &policy, &key).await;

        let request = ReleaseRequest {
            policy: policy.clone(),
            blob,
            assertion: assertion(&provider, &nodes, ChainId::Ethereum).await,
        };
        assert_eq!(
            nodes[1].release(&request).await.unwrap_err(),
            CustodyError::PolicyNotSatisfied
        );

        oracle.set_native_balance(ChainId::Ethereum, provider.address(), U256::from(1000u64));
        let request = ReleaseRequest {
            assertion: assertion(&provider, &nodes, ChainId::Ethereum).await,
            ..request
        };
        let shares = vec![
            nodes[1].release(&request).await.unwrap().share,
            nodes[2].release(&request).await.unwrap().share,
        ];
        let shared = combine(&shares, 2).unwrap();
        let recovered = blob.unwrap_key(&shared, &policy.digest()).unwrap();
        assert_eq!(recovered, key);
    }

    #[tokio::test]
    async fn test_release_rejects_other_policy() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "1000").unwrap();
        let looser = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "0").unwrap();
        let blob = escrow(&nodes, &provider, &policy, &SymmetricKey::generate().unwrap()).await;

        let request = ReleaseRequest {
            policy: looser,
            blob,
            assertion: assertion(&provider, &nodes, ChainId::Ethereum).await,
        };
        assert_eq!(
            nodes[0].release(&request).await.unwrap_err(),
            CustodyError::PolicyMismatch
        );
        // rejected before any chain lookup
        assert_eq!(oracle.query_count(), 0);
    }

    #[tokio::test]
    async fn test_relabelled_blob_refused() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let alice = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let bob = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let strict = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "1000").unwrap();
        let looser = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "0").unwrap();
        let blob = escrow(&nodes, &alice, &strict, &SymmetricKey::generate().unwrap()).await;

        // bob satisfies the looser policy and swaps its digest into the header
        let mut bytes = blob.bytes().to_vec();
        bytes[1..33].copy_from_slice(&looser.digest());
        let relabelled = EscrowedKeyBlob::try_from(&bytes[..]).unwrap();

        let request = ReleaseRequest {
            policy: looser,
            blob: relabelled,
            assertion: assertion(&bob, &nodes, ChainId::Ethereum).await,
        };
        for node in &nodes {
            let err = node.release(&request).await.unwrap_err();
            assert!(matches!(err, CustodyError::Integrity(_)), "{:?}", err);
        }
        assert_eq!(oracle.query_count(), 0);
    }

    #[tokio::test]
    async fn test_assertion_checks() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "0").unwrap();
        let blob = escrow(&nodes, &provider, &policy, &SymmetricKey::generate().unwrap()).await;

        let stale = provider
            .issue_at(
                ChainId::Ethereum,
                &nonces(&nodes),
                Utc::now() - Duration::minutes(30),
            )
            .await
            .unwrap();
        let request = ReleaseRequest {
            policy: policy.clone(),
            blob,
            assertion: stale,
        };
        assert_eq!(
            nodes[0].release(&request).await.unwrap_err(),
            CustodyError::AssertionExpired
        );

        let wrong_chain = ReleaseRequest {
            policy: policy.clone(),
            blob,
            assertion: assertion(&provider, &nodes, ChainId::Polygon).await,
        };
        assert!(matches!(
            nodes[0].release(&wrong_chain).await.unwrap_err(),
            CustodyError::InvalidAssertion(AssertionError::ChainMismatch { .. })
        ));

        let foreign = AuthProvider::new(LocalWallet::random().unwrap(), "elsewhere.test");
        let wrong_domain = ReleaseRequest {
            policy,
            blob,
            assertion: assertion(&foreign, &nodes, ChainId::Ethereum).await,
        };
        assert!(matches!(
            nodes[0].release(&wrong_domain).await.unwrap_err(),
            CustodyError::InvalidAssertion(AssertionError::DomainMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_replayed_assertion_refused() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "0").unwrap();
        let blob = escrow(&nodes, &provider, &policy, &SymmetricKey::generate().unwrap()).await;

        let request = ReleaseRequest {
            policy: policy.clone(),
            blob,
            assertion: assertion(&provider, &nodes, ChainId::Ethereum).await,
        };
        nodes[0].release(&request).await.unwrap();
        nodes[1].release(&request).await.unwrap();

        // the same assertion sent again, to a node that already spent its nonce
        assert_eq!(
            nodes[0].release(&request).await.unwrap_err(),
            CustodyError::InvalidAssertion(AssertionError::UnknownNonce)
        );

        // an assertion carrying nonces no node issued
        let forged = provider
            .issue(
                ChainId::Ethereum,
                &[NodeNonce {
                    index: 3,
                    nonce: crate::auth::Nonce::random().unwrap(),
                }],
            )
            .await
            .unwrap();
        let forged = ReleaseRequest {
            assertion: forged,
            ..request.clone()
        };
        assert_eq!(
            nodes[2].release(&forged).await.unwrap_err(),
            CustodyError::InvalidAssertion(AssertionError::UnknownNonce)
        );
        assert_eq!(
            nodes[1].release(&forged).await.unwrap_err(),
            CustodyError::InvalidAssertion(AssertionError::MissingNonce(2))
        );
    }

    #[tokio::test]
    async fn test_oracle_outage_never_grants() {
        let oracle = MemoryOracle::new();
        let nodes = network(&oracle);
        let provider = AuthProvider::new(LocalWallet::random().unwrap(), DOMAIN);
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "0").unwrap();
        let blob = escrow(&nodes, &provider, &policy, &SymmetricKey::generate().unwrap()).await;

        oracle.set_unavailable(true);
        let request = ReleaseRequest {
            policy,
            blob,
            assertion: assertion(&provider, &nodes, ChainId::Ethereum).await,
        };
        let err = nodes[0].release(&request).await.unwrap_err();
        assert!(matches!(err, CustodyError::Network(_)));
        assert!(err.is_retryable());
    }
}
