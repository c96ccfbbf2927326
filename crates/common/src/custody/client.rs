use std::fmt;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::messages::{EscrowRequest, KeyMaterial, NodeInfo, ReleaseRequest};
use super::transport::{CustodyTransport, NodeId};
use super::{CustodyError, ErrorKind};
use crate::auth::{AssertionError, AuthAssertion, NodeNonce};
use crate::crypto::{combine, DecryptionShare, EscrowedKeyBlob, NetworkKey, SymmetricKey};
use crate::policy::AccessPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a successful handshake established
#[derive(Debug, Clone)]
pub struct Session {
    pub network_key: NetworkKey,
    pub threshold: usize,
    pub domain: String,
    /// Nodes that answered the handshake, in transport order
    pub members: Vec<(NodeId, NodeInfo)>,
}

/// Handle to the custody network
///
/// Cheap to clone; all clones share one session. Concurrent first-time callers
/// wait on the same handshake instead of opening sessions of their own, and a
/// transport failure drops the session so the next call reconnects.
pub struct KeyCustodyClient<T> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    transport: T,
    expected_network_key: Option<NetworkKey>,
    session: Mutex<Option<Arc<Session>>>,
    state: RwLock<ConnectionState>,
}

impl<T> Clone for KeyCustodyClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for KeyCustodyClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCustodyClient")
            .field("state", &*self.inner.state.read())
            .field("expected_network_key", &self.inner.expected_network_key)
            .finish()
    }
}

/// Resets the state to `Disconnected` if a handshake is abandoned midway
struct ConnectingGuard<'a> {
    state: &'a RwLock<ConnectionState>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.write() = ConnectionState::Disconnected;
        }
    }
}

impl<T: CustodyTransport> KeyCustodyClient<T> {
    pub fn new(transport: T) -> Self {
        Self::build(transport, None)
    }

    /// Refuse sessions with nodes announcing any other network key
    pub fn with_network_key(transport: T, network_key: NetworkKey) -> Self {
        Self::build(transport, Some(network_key))
    }

    fn build(transport: T, expected_network_key: Option<NetworkKey>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                expected_network_key,
                session: Mutex::new(None),
                state: RwLock::new(ConnectionState::Disconnected),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Establish a session if there is none; idempotent
    pub async fn connect(&self) -> Result<Arc<Session>, CustodyError> {
        let mut session = self.inner.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.clone());
        }

        *self.inner.state.write() = ConnectionState::Connecting;
        let mut guard = ConnectingGuard {
            state: &self.inner.state,
            armed: true,
        };

        let established = Arc::new(self.handshake().await?);
        *session = Some(established.clone());
        guard.armed = false;
        *self.inner.state.write() = ConnectionState::Connected;

        tracing::info!(
            members = established.members.len(),
            threshold = established.threshold,
            network_key = %established.network_key.to_hex(),
            "custody session established"
        );
        Ok(established)
    }

    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        if session.take().is_some() {
            tracing::info!("custody session closed");
        }
        *self.inner.state.write() = ConnectionState::Disconnected;
    }

    async fn handshake(&self) -> Result<Session, CustodyError> {
        let members = self.inner.transport.handshake().await?;
        let Some((_, first)) = members.first() else {
            return Err(CustodyError::NetworkUnreachable(
                "no custody node answered".to_string(),
            ));
        };
        let network_key = first.network_key;
        let threshold = first.threshold;
        let domain = first.domain.clone();

        if let Some(expected) = self.inner.expected_network_key {
            if expected != network_key {
                return Err(CustodyError::Integrity(format!(
                    "custody network announced key {}, expected {}",
                    network_key.to_hex(),
                    expected.to_hex()
                )));
            }
        }
        if members.iter().any(|(_, info)| {
            info.network_key != network_key || info.threshold != threshold || info.domain != domain
        }) {
            return Err(CustodyError::Integrity(
                "custody nodes disagree on network parameters".to_string(),
            ));
        }
        if members.len() < threshold {
            return Err(CustodyError::NetworkUnreachable(format!(
                "{} of {} required custody nodes reachable",
                members.len(),
                threshold
            )));
        }

        Ok(Session {
            network_key,
            threshold,
            domain,
            members,
        })
    }

    /// Forget `failed` after a transport failure so the next call reconnects
    ///
    /// A session another caller has since re-established is left alone.
    async fn drop_session_on(&self, failed: &Arc<Session>, err: &CustodyError) {
        if err.kind() != ErrorKind::Connection {
            return;
        }
        let mut session = self.inner.session.lock().await;
        if !session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            return;
        }
        tracing::warn!(error = %err, "dropping custody session after transport failure");
        *session = None;
        *self.inner.state.write() = ConnectionState::Disconnected;
    }

    /// Collect one fresh nonce from every session member
    ///
    /// The requester signs over all of them; each node accepts the resulting
    /// assertion once. Fails unless at least `threshold` members answer.
    pub async fn challenge(&self) -> Result<Vec<NodeNonce>, CustodyError> {
        let session = self.connect().await?;
        let mut pending: FuturesUnordered<_> = session
            .members
            .iter()
            .map(|(node, info)| async move {
                let result = self.inner.transport.challenge(*node).await;
                (*node, info.index, result)
            })
            .collect();

        let mut nonces = Vec::with_capacity(session.members.len());
        let mut failures = Vec::new();
        while let Some((node, index, result)) = pending.next().await {
            match result {
                Ok(response) if response.index == index => nonces.push(NodeNonce {
                    index,
                    nonce: response.nonce,
                }),
                Ok(_) => failures.push(CustodyError::Integrity(format!(
                    "node {} issued a nonce for the wrong index",
                    node
                ))),
                Err(err) => {
                    tracing::debug!(node, error = %err, "challenge request failed");
                    failures.push(err);
                }
            }
        }
        drop(pending);

        if nonces.len() < session.threshold {
            let err = prioritise(failures);
            self.drop_session_on(&session, &err).await;
            return Err(err);
        }
        nonces.sort_by_key(|n| n.index);
        Ok(nonces)
    }

    /// Escrow `key` under `policy`
    ///
    /// Not retried on failure: a failed escrow is surfaced as is.
    pub async fn escrow_key(
        &self,
        policy: &AccessPolicy,
        key: &SymmetricKey,
        assertion: &AuthAssertion,
    ) -> Result<EscrowedKeyBlob, CustodyError> {
        policy
            .validate()
            .map_err(|e| CustodyError::EscrowRejected(e.to_string()))?;
        check_chain(policy, assertion)?;

        let session = self.connect().await?;
        let entry = session
            .members
            .first()
            .map(|(node, _)| *node)
            .ok_or_else(|| CustodyError::NetworkUnreachable("empty session".to_string()))?;
        let request = EscrowRequest {
            policy: policy.clone(),
            key: KeyMaterial::from_key(key),
            assertion: assertion.clone(),
        };

        tracing::debug!(node = entry, chain = %policy.chain(), "escrowing key");
        let response = match self.inner.transport.escrow(entry, &request).await {
            Ok(response) => response,
            Err(err) => {
                self.drop_session_on(&session, &err).await;
                return Err(err);
            }
        };

        let blob = response.blob;
        if blob.policy_digest() != policy.digest().as_slice() || blob.verify_binding().is_err() {
            return Err(CustodyError::Integrity(
                "escrowed blob is not bound to the requested policy".to_string(),
            ));
        }
        Ok(blob)
    }

    /// Ask the network to release the key wrapped in `blob`
    ///
    /// Every member is asked concurrently; the first `threshold` shares are
    /// combined. If too few nodes grant, the most actionable error wins:
    /// a policy denial, then an assertion problem, then any other reason.
    pub async fn release_key(
        &self,
        policy: &AccessPolicy,
        blob: &EscrowedKeyBlob,
        assertion: &AuthAssertion,
    ) -> Result<SymmetricKey, CustodyError> {
        blob.verify_binding()
            .map_err(|e| CustodyError::Integrity(e.to_string()))?;
        if blob.policy_digest() != policy.digest().as_slice() {
            return Err(CustodyError::PolicyMismatch);
        }
        check_chain(policy, assertion)?;

        let session = self.connect().await?;
        let request = ReleaseRequest {
            policy: policy.clone(),
            blob: *blob,
            assertion: assertion.clone(),
        };

        let mut pending: FuturesUnordered<_> = session
            .members
            .iter()
            .map(|(node, info)| {
                let request = &request;
                async move {
                    let result = self.inner.transport.request_share(*node, request).await;
                    (*node, info.index, result)
                }
            })
            .collect();

        let mut shares: Vec<DecryptionShare> = Vec::with_capacity(session.threshold);
        let mut failures: Vec<CustodyError> = Vec::new();
        while let Some((node, index, result)) = pending.next().await {
            match result {
                Ok(response) if response.share.index() == index => {
                    shares.push(response.share);
                    if shares.len() == session.threshold {
                        break;
                    }
                }
                Ok(_) => {
                    tracing::warn!(node, "node answered with a share for another index");
                    failures.push(CustodyError::Integrity(format!(
                        "node {} returned a share for the wrong index",
                        node
                    )));
                }
                Err(err) => {
                    tracing::debug!(node, error = %err, "share request failed");
                    failures.push(err);
                }
            }
        }
        drop(pending);

        if shares.len() < session.threshold {
            let err = prioritise(failures);
            self.drop_session_on(&session, &err).await;
            return Err(err);
        }

        let shared = combine(&shares, session.threshold)
            .map_err(|e| CustodyError::Integrity(e.to_string()))?;
        blob.unwrap_key(&shared, &policy.digest())
            .map_err(|e| CustodyError::Integrity(format!("released shares do not unwrap: {}", e)))
    }
}

fn check_chain(policy: &AccessPolicy, assertion: &AuthAssertion) -> Result<(), CustodyError> {
    if assertion.chain != policy.chain() {
        return Err(AssertionError::ChainMismatch {
            expected: policy.chain(),
            found: assertion.chain,
        }
        .into());
    }
    Ok(())
}

/// Pick the error to report when too few nodes granted a release
fn prioritise(failures: Vec<CustodyError>) -> CustodyError {
    if failures.contains(&CustodyError::PolicyNotSatisfied) {
        return CustodyError::PolicyNotSatisfied;
    }
    let rank = |err: &CustodyError| match err.kind() {
        ErrorKind::Assertion => 0,
        ErrorKind::Policy => 1,
        ErrorKind::CryptoIntegrity => 2,
        ErrorKind::Connection => 3,
    };
    failures
        .into_iter()
        .min_by_key(rank)
        .unwrap_or_else(|| CustodyError::Network("not enough custody nodes answered".to_string()))
}
