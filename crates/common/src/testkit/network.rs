use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ethers_core::types::U256;

use crate::auth::{AuthProvider, LocalWallet, Signer};
use crate::crypto::{deal, Address};
use crate::custody::{CustodyNode, KeyCustodyClient, LocalNetwork};
use crate::oracle::MemoryOracle;
use crate::policy::ChainId;
use crate::workflow::EncryptionWorkflow;

/// Domain every test node and requester agrees on
pub const TEST_DOMAIN: &str = "custody.test";

/// An in-process custody network with scriptable chain state
///
/// Holds a dealt [`LocalNetwork`], the [`MemoryOracle`] its nodes evaluate
/// policies against, and a set of named requester wallets.
pub struct TestNetwork {
    network: LocalNetwork,
    oracle: MemoryOracle,
    requesters: HashMap<String, LocalWallet>,
}

impl TestNetwork {
    /// Deal a `threshold`-of-`nodes` network
    pub fn new(threshold: usize, nodes: usize) -> Result<Self> {
        Self::with_latency(threshold, nodes, None)
    }

    /// Like [`new`](Self::new), with every message delayed by `latency`
    pub fn with_latency(threshold: usize, nodes: usize, latency: Option<Duration>) -> Result<Self> {
        let oracle = MemoryOracle::new();
        let (network_key, shares) = deal(threshold, nodes)?;
        let members = shares
            .into_iter()
            .map(|share| {
                CustodyNode::new(
                    share,
                    network_key,
                    threshold,
                    nodes,
                    TEST_DOMAIN,
                    Arc::new(oracle.clone()),
                )
            })
            .collect();
        tracing::debug!(threshold, nodes, "dealt test custody network");

        Ok(Self {
            network: LocalNetwork::with_latency(members, latency),
            oracle,
            requesters: HashMap::new(),
        })
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn oracle(&self) -> &MemoryOracle {
        &self.oracle
    }

    /// Create a wallet for a new named requester
    pub fn add_requester(&mut self, name: impl Into<String>) -> Result<Address> {
        let name = name.into();
        if self.requesters.contains_key(&name) {
            return Err(anyhow::anyhow!("Requester '{}' already exists", name));
        }
        let wallet = LocalWallet::random()?;
        let address = wallet.address();
        self.requesters.insert(name, wallet);
        Ok(address)
    }

    pub fn requester(&self, name: &str) -> Result<&LocalWallet> {
        self.requesters
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown requester '{}'", name))
    }

    pub fn address(&self, name: &str) -> Result<Address> {
        Ok(self.requester(name)?.address())
    }

    /// A fresh client with no session yet
    pub fn client(&self) -> KeyCustodyClient<LocalNetwork> {
        KeyCustodyClient::new(self.network.clone())
    }

    /// A workflow acting as `name`, with its own client
    pub fn workflow(&self, name: &str) -> Result<EncryptionWorkflow<LocalNetwork, LocalWallet>> {
        self.workflow_with_client(name, &self.client())
    }

    /// A workflow acting as `name` that shares `client`'s session
    pub fn workflow_with_client(
        &self,
        name: &str,
        client: &KeyCustodyClient<LocalNetwork>,
    ) -> Result<EncryptionWorkflow<LocalNetwork, LocalWallet>> {
        let auth = AuthProvider::new(self.requester(name)?.clone(), TEST_DOMAIN);
        Ok(EncryptionWorkflow::new(client.clone(), auth))
    }

    pub fn set_native_balance(&self, chain: ChainId, name: &str, wei: u128) -> Result<()> {
        let holder = self.address(name)?;
        self.oracle.set_native_balance(chain, holder, U256::from(wei));
        Ok(())
    }

    /// Give `name` `amount` tokens of `contract`
    pub fn grant_tokens(
        &self,
        chain: ChainId,
        contract: Address,
        name: &str,
        amount: u64,
    ) -> Result<()> {
        let holder = self.address(name)?;
        self.oracle
            .set_token_balance(chain, contract, holder, U256::from(amount));
        Ok(())
    }

    pub fn revoke_tokens(&self, chain: ChainId, contract: Address, name: &str) -> Result<()> {
        self.grant_tokens(chain, contract, name, 0)
    }
}
