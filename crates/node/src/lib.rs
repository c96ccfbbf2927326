//! Warden custody node
//!
//! Serves one share of the network key over HTTP. Requesters open a session
//! with `GET /api/v0/handshake`, escrow keys with `POST /api/v0/escrow` and ask
//! for decryption shares with `POST /api/v0/release`; the node evaluates the
//! escrowed policy against live chain state before answering.

use std::sync::Arc;

use common::custody::CustodyNode;

pub mod config;
pub mod http_server;

pub use config::{ConfigError, NodeConfig};

/// Shared state handed to every request handler
#[derive(Debug, Clone)]
pub struct NodeState {
    node: Arc<CustodyNode>,
}

impl NodeState {
    pub fn new(node: CustodyNode) -> Self {
        Self {
            node: Arc::new(node),
        }
    }

    pub fn node(&self) -> &CustodyNode {
        &self.node
    }
}
