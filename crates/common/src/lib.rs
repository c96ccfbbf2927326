/**
 * Authentication assertions.
 *  - Chain-scoped, time-bound sign-in challenges
 *  - Signer abstraction over wallets
 */
pub mod auth;
/**
 * Cryptographic types and operations.
 *  - Symmetric locator encryption
 *  - Threshold network key and policy-bound key escrow
 *  - Ethereum wallet keys and signature recovery
 */
pub mod crypto;
/**
 * Threshold key custody: node logic, transports
 *  and the session-holding client.
 */
pub mod custody;
/**
 * Read-only chain state used to evaluate
 *  access policies at release time.
 */
pub mod oracle;
/**
 * Declarative access policies over on-chain state.
 */
pub mod policy;
/**
 * Content-addressed storage backends.
 *  Just light wrappers around iroh-blobs
 *  and the IPFS HTTP API
 */
pub mod store;
/**
 * In-process custody networks for tests.
 */
pub mod testkit;
/**
 * Encrypt-and-escrow orchestration.
 */
pub mod workflow;

pub mod prelude {
    pub use crate::auth::{AuthAssertion, AuthProvider, LocalWallet, Signer};
    pub use crate::crypto::{Address, Ciphertext, EscrowedKeyBlob, NetworkKey, WalletKey};
    pub use crate::custody::{
        CustodyError, ErrorKind, HttpTransport, KeyCustodyClient, LocalNetwork,
    };
    pub use crate::policy::{AccessPolicy, ChainId, Comparator, StandardContractType};
    pub use crate::store::{BlobsContentStore, ContentStore, IpfsContentStore};
    pub use crate::workflow::{EncryptedRecord, EncryptionWorkflow, WorkflowError};
}
