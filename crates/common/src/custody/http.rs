use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use super::messages::{
    ChallengeResponse, EscrowRequest, EscrowResponse, ErrorReply, NodeInfo, ReleaseRequest,
    ReleaseResponse, CHALLENGE_PATH, ESCROW_PATH, HANDSHAKE_PATH, RELEASE_PATH,
};
use super::transport::{CustodyTransport, NodeId};
use super::CustodyError;

/// A request one custody node endpoint understands
pub trait ApiRequest {
    type Response: DeserializeOwned;

    fn build_request(self, base_url: &Url, client: &Client)
        -> Result<RequestBuilder, url::ParseError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HandshakeRequest;

impl ApiRequest for HandshakeRequest {
    type Response = NodeInfo;

    fn build_request(
        self,
        base_url: &Url,
        client: &Client,
    ) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(base_url.join(HANDSHAKE_PATH)?))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChallengeRequest;

impl ApiRequest for ChallengeRequest {
    type Response = ChallengeResponse;

    fn build_request(
        self,
        base_url: &Url,
        client: &Client,
    ) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.get(base_url.join(CHALLENGE_PATH)?))
    }
}

impl ApiRequest for &EscrowRequest {
    type Response = EscrowResponse;

    fn build_request(
        self,
        base_url: &Url,
        client: &Client,
    ) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.post(base_url.join(ESCROW_PATH)?).json(self))
    }
}

impl ApiRequest for &ReleaseRequest {
    type Response = ReleaseResponse;

    fn build_request(
        self,
        base_url: &Url,
        client: &Client,
    ) -> Result<RequestBuilder, url::ParseError> {
        Ok(client.post(base_url.join(RELEASE_PATH)?).json(self))
    }
}

/// Custody transport over the nodes' HTTP API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    nodes: Vec<Url>,
    client: Client,
}

impl HttpTransport {
    pub fn new(nodes: Vec<Url>) -> Result<Self, CustodyError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CustodyError::Network(e.to_string()))?;
        Ok(Self { nodes, client })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.nodes
    }

    pub async fn call<T: ApiRequest>(
        &self,
        node: NodeId,
        request: T,
    ) -> Result<T::Response, CustodyError> {
        let base_url = self
            .nodes
            .get(node)
            .ok_or_else(|| CustodyError::Network(format!("no such node {}", node)))?;
        let request_builder = request
            .build_request(base_url, &self.client)
            .map_err(|e| CustodyError::Network(format!("invalid node url: {}", e)))?;
        let response = request_builder
            .send()
            .await
            .map_err(|e| CustodyError::Network(format!("{}: {}", base_url, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T::Response>()
                .await
                .map_err(|e| CustodyError::Network(format!("bad response body: {}", e)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CustodyError::Network(e.to_string()))?;
        match serde_json::from_str::<ErrorReply>(&body) {
            Ok(reply) => Err(reply.error),
            Err(_) => Err(CustodyError::Network(format!("HTTP {}: {}", status, body))),
        }
    }
}

#[async_trait]
impl CustodyTransport for HttpTransport {
    fn nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).collect()
    }

    async fn handshake(&self) -> Result<Vec<(NodeId, NodeInfo)>, CustodyError> {
        let calls = self.nodes().into_iter().map(|node| async move {
            let result = self.call(node, HandshakeRequest).await;
            if let Err(e) = &result {
                tracing::debug!(node, error = %e, "handshake failed");
            }
            result.ok().map(|info| (node, info))
        });
        Ok(join_all(calls).await.into_iter().flatten().collect())
    }

    async fn challenge(&self, node: NodeId) -> Result<ChallengeResponse, CustodyError> {
        self.call(node, ChallengeRequest).await
    }

    async fn escrow(
        &self,
        node: NodeId,
        request: &EscrowRequest,
    ) -> Result<EscrowResponse, CustodyError> {
        self.call(node, request).await
    }

    async fn request_share(
        &self,
        node: NodeId,
        request: &ReleaseRequest,
    ) -> Result<ReleaseResponse, CustodyError> {
        self.call(node, request).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_urls() {
        let client = Client::new();
        let base: Url = "http://127.0.0.1:7420".parse().unwrap();
        let request = HandshakeRequest
            .build_request(&base, &client)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/api/v0/handshake");

        let request = ChallengeRequest
            .build_request(&base, &client)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/api/v0/challenge");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_network_error() {
        // port 9 (discard) is essentially never listening for HTTP locally
        let transport = HttpTransport::new(vec!["http://127.0.0.1:9".parse().unwrap()]).unwrap();
        let infos = transport.handshake().await.unwrap();
        assert!(infos.is_empty());
        let err = transport.call(0, HandshakeRequest).await.unwrap_err();
        assert!(matches!(err, CustodyError::Network(_)));
    }
}
