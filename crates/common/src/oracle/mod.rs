//! Read-only chain state lookups used to evaluate access policies

mod json_rpc;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::policy::{AccessPolicy, ChainId, StandardContractType};

pub use json_rpc::JsonRpcOracle;
pub use memory::MemoryOracle;

/// Selector of `balanceOf(address)` (ERC20 and ERC721)
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// Selector of `balanceOf(address,uint256)` (ERC1155)
pub const ERC1155_BALANCE_OF_SELECTOR: [u8; 4] = [0x00, 0xfd, 0xd5, 0x8e];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum OracleError {
    #[error("no rpc endpoint configured for chain {0}")]
    UnsupportedChain(ChainId),
    #[error("unsupported method {method} for contract type {standard:?}")]
    UnsupportedMethod {
        method: String,
        standard: StandardContractType,
    },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("could not decode rpc result: {0}")]
    Decode(String),
}

/// One resolved policy lookup: placeholders already substituted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateQuery {
    pub chain: ChainId,
    pub contract_address: Option<Address>,
    pub standard: StandardContractType,
    pub method: String,
    pub parameters: Vec<String>,
}

impl StateQuery {
    pub fn for_policy(policy: &AccessPolicy, requester: &Address) -> Self {
        Self {
            chain: policy.chain(),
            contract_address: policy.contract(),
            standard: policy.standard_contract_type(),
            method: policy.method().to_string(),
            parameters: policy.resolve_parameters(requester),
        }
    }

    pub(crate) fn address_parameter(&self, position: usize) -> Result<Address, OracleError> {
        let raw = self.parameters.get(position).ok_or_else(|| {
            OracleError::InvalidQuery(format!("{} expects an address parameter", self.method))
        })?;
        raw.parse()
            .map_err(|_| OracleError::InvalidQuery(format!("not an address: {}", raw)))
    }

    pub(crate) fn contract(&self) -> Result<Address, OracleError> {
        self.contract_address.ok_or_else(|| {
            OracleError::InvalidQuery(format!("{} requires a contract address", self.method))
        })
    }
}

/// Source of live chain state
///
/// Returns the observed value as a canonical decimal string for numeric
/// results, so it can be fed straight into `ReturnValueTest::holds`.
#[async_trait]
pub trait ChainStateOracle: Send + Sync + std::fmt::Debug {
    async fn query(&self, query: &StateQuery) -> Result<String, OracleError>;
}
