//! Cryptographic primitives for Warden
//!
//! - **Locator encryption**: ChaCha20-Poly1305 with a fresh `SymmetricKey` per item
//! - **Network key**: a Curve25519 scalar Shamir-shared across custody nodes
//! - **Escrow**: threshold ECDH + AES-KW wrapping of the symmetric key, bound to a policy digest
//! - **Identity**: Ethereum addresses and EIP-191 signatures over secp256k1
//!
//! # Security Model
//!
//! ## Symmetric keys
//! Generated per encryption, zeroed on drop, never serialized. The only copy
//! that outlives the encrypt call is the wrapped one inside an `EscrowedKeyBlob`.
//!
//! ## Custody
//! No single node holds the network scalar. A release needs `threshold` nodes to
//! independently agree that the requester satisfies the policy and to contribute
//! their decryption share.

mod escrow;
mod secret;
mod threshold;
mod wallet;

pub use escrow::{
    EscrowError, EscrowedKeyBlob, BLOB_VERSION, ESCROWED_KEY_BLOB_SIZE, POLICY_DIGEST_SIZE,
};
pub use secret::{Ciphertext, SecretError, SymmetricKey, KEY_SIZE};
pub use threshold::{
    combine, deal, DecryptionShare, KeyShare, NetworkKey, ThresholdError, MAX_NODES,
};
pub use wallet::{
    personal_message_digest, recover_signer, Address, WalletError, WalletKey, SIGNATURE_SIZE,
};
