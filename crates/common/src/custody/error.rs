use serde::{Deserialize, Serialize};

use crate::auth::AssertionError;
use crate::policy::PolicyError;

/// Coarse failure classes, shared by the custody client and the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level; retry as is
    Connection,
    /// Malformed or unsatisfied policy; retrying needs different inputs
    Policy,
    /// Signing declined, expired or invalid assertion; retry after reissuing
    Assertion,
    /// Key material does not validate against the data it should unlock
    CryptoIntegrity,
}

/// Errors reported by custody nodes and the custody client
///
/// Serializable so nodes can return them verbatim over the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum CustodyError {
    #[error("custody network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("escrow rejected: {0}")]
    EscrowRejected(String),
    #[error("access policy not satisfied")]
    PolicyNotSatisfied,
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("policy does not match the one the key was escrowed under")]
    PolicyMismatch,
    #[error("policy cannot be evaluated: {0}")]
    Unevaluable(String),
    #[error("assertion expired")]
    AssertionExpired,
    #[error("invalid assertion: {0}")]
    InvalidAssertion(AssertionError),
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl From<AssertionError> for CustodyError {
    fn from(err: AssertionError) -> Self {
        match err {
            AssertionError::Expired(_) => CustodyError::AssertionExpired,
            other => CustodyError::InvalidAssertion(other),
        }
    }
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::NetworkUnreachable(_) | CustodyError::Network(_) => ErrorKind::Connection,
            CustodyError::EscrowRejected(_)
            | CustodyError::PolicyNotSatisfied
            | CustodyError::Policy(_)
            | CustodyError::PolicyMismatch
            | CustodyError::Unevaluable(_) => ErrorKind::Policy,
            CustodyError::AssertionExpired | CustodyError::InvalidAssertion(_) => {
                ErrorKind::Assertion
            }
            CustodyError::Integrity(_) => ErrorKind::CryptoIntegrity,
        }
    }

    /// Whether the same call may succeed later, possibly with a fresh assertion
    pub fn is_retryable(&self) -> bool {
        match self {
            CustodyError::NetworkUnreachable(_)
            | CustodyError::Network(_)
            | CustodyError::AssertionExpired => true,
            CustodyError::InvalidAssertion(err) => err.is_retryable(),
            _ => false,
        }
    }
}
