//! Shared test utilities for custody integration tests
#![allow(dead_code)]

use std::str::FromStr;
use std::time::Duration;

use common::crypto::Address;
use common::policy::{AccessPolicy, ChainId};
use common::testkit::TestNetwork;

pub const LOCATOR: &str = "ipfs://Qm123";
/// 0.00001 ETH
pub const MIN_BALANCE_WEI: &str = "10000000000000";
pub const NFT_CONTRACT: &str = "0x89b597199dAc806Ceecfc091e56044D34E59985c";

/// A 2-of-3 network with one funded requester ("alice") and one broke one ("bob")
pub fn setup_test_env() -> TestNetwork {
    setup_with_latency(None)
}

pub fn setup_with_latency(latency: Option<Duration>) -> TestNetwork {
    let mut net = TestNetwork::with_latency(2, 3, latency).unwrap();
    net.add_requester("alice").unwrap();
    net.add_requester("bob").unwrap();
    net.set_native_balance(ChainId::Ethereum, "alice", 10_000_000_000_000)
        .unwrap();
    net.set_native_balance(ChainId::Ethereum, "bob", 1).unwrap();
    net
}

pub fn balance_policy() -> AccessPolicy {
    AccessPolicy::native_balance_at_least(ChainId::Ethereum, MIN_BALANCE_WEI).unwrap()
}

pub fn nft_contract() -> Address {
    Address::from_str(NFT_CONTRACT).unwrap()
}

pub fn nft_policy() -> AccessPolicy {
    AccessPolicy::erc721_holder(ChainId::Ethereum, nft_contract()).unwrap()
}
