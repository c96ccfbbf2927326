/// Lightweight harness for custody integration tests
///
/// Runs a whole custody network in-process against scripted chain state, so
/// escrow and release can be exercised without nodes, RPC endpoints or wallets.
///
/// # Example
///
/// ```rust,ignore
/// use common::policy::{AccessPolicy, ChainId};
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_holder_can_decrypt() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new(2, 3)?;
///     net.add_requester("alice")?;
///     net.set_native_balance(ChainId::Ethereum, "alice", 1_000)?;
///
///     let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "1000")?;
///     let alice = net.workflow("alice")?;
///     let (ciphertext, blob) = alice.encrypt("ipfs://Qm123", &policy).await?;
///     assert_eq!(alice.decrypt(&ciphertext, &blob, &policy).await?, "ipfs://Qm123");
///     Ok(())
/// }
/// ```
mod network;

pub use network::{TestNetwork, TEST_DOMAIN};
