//! Threshold key custody
//!
//! Symmetric keys are escrowed with a network of custody nodes that each hold
//! one Shamir share of a Curve25519 scalar. Escrow wraps the key under the
//! network's public key, bound to the digest of an [`AccessPolicy`]. Release
//! asks every node for its decryption share; each node first verifies the
//! requester's [`AuthAssertion`] and evaluates the policy against live chain
//! state. The client combines a threshold of shares to unwrap the key.
//!
//! Before each call the client collects one single-use nonce from every
//! session member; the requester's assertion signs over all of them and each
//! node spends its own when it accepts the assertion.
//!
//! - [`CustodyNode`]: the node-side logic, independent of transport
//! - [`CustodyTransport`]: how the client reaches nodes ([`LocalNetwork`], [`HttpTransport`])
//! - [`KeyCustodyClient`]: session management, fan-out and share combination
//!
//! [`AccessPolicy`]: crate::policy::AccessPolicy
//! [`AuthAssertion`]: crate::auth::AuthAssertion

mod client;
mod error;
mod http;
mod local;
mod messages;
mod node;
mod nonces;
mod transport;

pub use client::{ConnectionState, KeyCustodyClient, Session};
pub use error::{CustodyError, ErrorKind};
pub use http::{ApiRequest, ChallengeRequest, HandshakeRequest, HttpTransport};
pub use local::LocalNetwork;
pub use messages::{
    ChallengeResponse, EscrowRequest, EscrowResponse, ErrorReply, KeyMaterial, NodeInfo,
    ReleaseRequest, ReleaseResponse, CHALLENGE_PATH, ESCROW_PATH, HANDSHAKE_PATH, RELEASE_PATH,
};
pub use node::{CustodyNode, DEFAULT_MAX_SKEW_SECS};
pub use nonces::{NonceStore, DEFAULT_NONCE_TTL_SECS, MAX_OUTSTANDING_NONCES};
pub use transport::{CustodyTransport, NodeId};
