use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::messages::{
    ChallengeResponse, EscrowRequest, EscrowResponse, NodeInfo, ReleaseRequest, ReleaseResponse,
};
use super::node::CustodyNode;
use super::transport::{CustodyTransport, NodeId};
use super::CustodyError;
use crate::crypto::{deal, NetworkKey, ThresholdError};
use crate::oracle::ChainStateOracle;

/// An in-process custody network
///
/// Every node runs in the caller's process; messages are passed by reference.
/// Reachability can be toggled to exercise the client's failure handling.
#[derive(Debug, Clone)]
pub struct LocalNetwork {
    inner: Arc<LocalNetworkInner>,
}

#[derive(Debug)]
struct LocalNetworkInner {
    nodes: Vec<CustodyNode>,
    handshakes: AtomicUsize,
    reachable: AtomicBool,
    down: RwLock<HashSet<NodeId>>,
    latency: Option<Duration>,
}

impl LocalNetwork {
    pub fn new(nodes: Vec<CustodyNode>) -> Self {
        Self::with_latency(nodes, None)
    }

    /// Delay every message by `latency`
    pub fn with_latency(nodes: Vec<CustodyNode>, latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(LocalNetworkInner {
                nodes,
                handshakes: AtomicUsize::new(0),
                reachable: AtomicBool::new(true),
                down: RwLock::new(HashSet::new()),
                latency,
            }),
        }
    }

    /// Deal a fresh network key and spin up one node per share
    pub fn deal(
        threshold: usize,
        nodes: usize,
        domain: &str,
        oracle: Arc<dyn ChainStateOracle>,
    ) -> Result<Self, ThresholdError> {
        let (network_key, shares) = deal(threshold, nodes)?;
        let members = shares
            .into_iter()
            .map(|share| {
                CustodyNode::new(share, network_key, threshold, nodes, domain, oracle.clone())
            })
            .collect();
        Ok(Self::new(members))
    }

    pub fn network_key(&self) -> Option<NetworkKey> {
        self.inner.nodes.first().map(|node| node.info().network_key)
    }

    pub fn node(&self, node: NodeId) -> Option<&CustodyNode> {
        self.inner.nodes.get(node)
    }

    /// Number of sessions opened against this network
    pub fn handshake_count(&self) -> usize {
        self.inner.handshakes.load(Ordering::SeqCst)
    }

    /// Take the whole network off (or back on) the air
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_node_down(&self, node: NodeId, down: bool) {
        let mut set = self.inner.down.write();
        if down {
            set.insert(node);
        } else {
            set.remove(&node);
        }
    }

    async fn route(&self, node: NodeId) -> Result<&CustodyNode, CustodyError> {
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.reachable.load(Ordering::SeqCst) || self.inner.down.read().contains(&node)
        {
            return Err(CustodyError::Network(format!("node {} unreachable", node)));
        }
        self.inner
            .nodes
            .get(node)
            .ok_or_else(|| CustodyError::Network(format!("no such node {}", node)))
    }
}

#[async_trait]
impl CustodyTransport for LocalNetwork {
    fn nodes(&self) -> Vec<NodeId> {
        (0..self.inner.nodes.len()).collect()
    }

    async fn handshake(&self) -> Result<Vec<(NodeId, NodeInfo)>, CustodyError> {
        self.inner.handshakes.fetch_add(1, Ordering::SeqCst);
        let mut infos = Vec::new();
        for node in self.nodes() {
            if let Ok(custody_node) = self.route(node).await {
                infos.push((node, custody_node.info()));
            }
        }
        Ok(infos)
    }

    async fn challenge(&self, node: NodeId) -> Result<ChallengeResponse, CustodyError> {
        self.route(node).await?.challenge()
    }

    async fn escrow(
        &self,
        node: NodeId,
        request: &EscrowRequest,
    ) -> Result<EscrowResponse, CustodyError> {
        self.route(node).await?.escrow(request)
    }

    async fn request_share(
        &self,
        node: NodeId,
        request: &ReleaseRequest,
    ) -> Result<ReleaseResponse, CustodyError> {
        self.route(node).await?.release(request).await
    }
}
