use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use ethers_core::types::U256;

use super::{ChainStateOracle, OracleError, StateQuery};
use crate::crypto::Address;
use crate::policy::{ChainId, StandardContractType};

/// In-memory chain state, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryOracle {
    inner: Arc<RwLock<MemoryOracleInner>>,
}

#[derive(Debug, Default)]
struct MemoryOracleInner {
    native_balances: HashMap<(ChainId, Address), U256>,
    /// (chain, contract, holder) -> balance
    token_balances: HashMap<(ChainId, Address, Address), U256>,
    /// Exact (chain, method, resolved parameters) -> value, for anything else
    values: HashMap<(ChainId, String, Vec<String>), String>,
    unavailable: bool,
    queries: usize,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryOracleInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_native_balance(&self, chain: ChainId, holder: Address, wei: U256) {
        self.write().native_balances.insert((chain, holder), wei);
    }

    pub fn set_token_balance(&self, chain: ChainId, contract: Address, holder: Address, n: U256) {
        self.write()
            .token_balances
            .insert((chain, contract, holder), n);
    }

    pub fn set_value<I, P>(&self, chain: ChainId, method: &str, parameters: I, value: &str)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let parameters = parameters.into_iter().map(Into::into).collect();
        self.write()
            .values
            .insert((chain, method.to_string(), parameters), value.to_string());
    }

    /// Simulate an unreachable chain node
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Number of queries answered or refused so far
    pub fn query_count(&self) -> usize {
        self.inner.read().map(|inner| inner.queries).unwrap_or(0)
    }
}

#[async_trait]
impl ChainStateOracle for MemoryOracle {
    async fn query(&self, query: &StateQuery) -> Result<String, OracleError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| OracleError::Rpc(format!("failed to acquire lock: {}", e)))?;
        inner.queries += 1;
        if inner.unavailable {
            return Err(OracleError::Rpc("chain state unavailable".to_string()));
        }

        let exact = (query.chain, query.method.clone(), query.parameters.clone());
        if let Some(value) = inner.values.get(&exact) {
            return Ok(value.clone());
        }

        match (query.method.as_str(), query.standard) {
            ("eth_getBalance", StandardContractType::None) => {
                let holder = query.address_parameter(0)?;
                let balance = inner
                    .native_balances
                    .get(&(query.chain, holder))
                    .copied()
                    .unwrap_or_default();
                Ok(balance.to_string())
            }
            ("balanceOf", StandardContractType::Erc20)
            | ("balanceOf", StandardContractType::Erc721)
            | ("balanceOf", StandardContractType::Erc1155) => {
                let contract = query.contract()?;
                let holder = query.address_parameter(0)?;
                let balance = inner
                    .token_balances
                    .get(&(query.chain, contract, holder))
                    .copied()
                    .unwrap_or_default();
                Ok(balance.to_string())
            }
            (method, standard) => Err(OracleError::UnsupportedMethod {
                method: method.to_string(),
                standard,
            }),
        }
    }
}
