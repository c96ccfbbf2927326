use async_trait::async_trait;

use super::messages::{
    ChallengeResponse, EscrowRequest, EscrowResponse, NodeInfo, ReleaseRequest, ReleaseResponse,
};
use super::CustodyError;

/// Position of a node within a transport's node list
pub type NodeId = usize;

/// How the custody client reaches the nodes
///
/// A transport only moves messages; session bookkeeping, share combination
/// and error prioritisation live in `KeyCustodyClient`.
#[async_trait]
pub trait CustodyTransport: Send + Sync + 'static {
    fn nodes(&self) -> Vec<NodeId>;

    /// Open a session by asking every node for its info
    ///
    /// Nodes that fail to answer are left out of the result; it is up to the
    /// caller to decide whether enough answered.
    async fn handshake(&self) -> Result<Vec<(NodeId, NodeInfo)>, CustodyError>;

    /// Ask one node for a fresh single-use nonce
    async fn challenge(&self, node: NodeId) -> Result<ChallengeResponse, CustodyError>;

    async fn escrow(
        &self,
        node: NodeId,
        request: &EscrowRequest,
    ) -> Result<EscrowResponse, CustodyError>;

    async fn request_share(
        &self,
        node: NodeId,
        request: &ReleaseRequest,
    ) -> Result<ReleaseResponse, CustodyError>;
}
