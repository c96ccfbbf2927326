//! Encrypt-and-escrow orchestration
//!
//! [`EncryptionWorkflow::encrypt`] encrypts a locator under a fresh key and
//! escrows that key under a policy; [`EncryptionWorkflow::decrypt`] reverses it
//! for a requester who currently satisfies the policy. The key lives only for
//! the duration of either call.

mod record;

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;

use crate::auth::{AssertionError, AuthAssertion, AuthProvider, Signer};
use crate::crypto::{Ciphertext, EscrowedKeyBlob, SecretError, SymmetricKey};
use crate::custody::{CustodyError, CustodyTransport, ErrorKind, KeyCustodyClient};
use crate::policy::{AccessPolicy, ChainId};
use crate::store::{ContentStore, StoreError};

pub use record::EncryptedRecord;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Custody(#[from] CustodyError),
    #[error("signing failed: {0}")]
    Signing(#[from] AssertionError),
    /// The released key does not authenticate the ciphertext
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("content store error: {0}")]
    Store(#[from] StoreError),
    #[error("plaintext is not valid utf-8: {0}")]
    InvalidPlaintext(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Custody(err) => err.kind(),
            WorkflowError::Signing(_) => ErrorKind::Assertion,
            WorkflowError::DecryptionFailed(_)
            | WorkflowError::Encryption(_)
            | WorkflowError::InvalidPlaintext(_) => ErrorKind::CryptoIntegrity,
            WorkflowError::Store(_) => ErrorKind::Connection,
        }
    }

    pub fn is_policy_not_satisfied(&self) -> bool {
        matches!(
            self,
            WorkflowError::Custody(CustodyError::PolicyNotSatisfied)
        )
    }
}

/// Orchestrates local encryption, key escrow and key release
///
/// Owns a custody client handle and an assertion provider. Cloning is cheap
/// and clones share the custody session.
#[derive(Debug)]
pub struct EncryptionWorkflow<T, S> {
    custody: KeyCustodyClient<T>,
    auth: AuthProvider<S>,
    deadline: Option<Duration>,
}

impl<T, S> Clone for EncryptionWorkflow<T, S> {
    fn clone(&self) -> Self {
        Self {
            custody: self.custody.clone(),
            auth: self.auth.clone(),
            deadline: self.deadline,
        }
    }
}

impl<T: CustodyTransport, S: Signer> EncryptionWorkflow<T, S> {
    pub fn new(custody: KeyCustodyClient<T>, auth: AuthProvider<S>) -> Self {
        Self {
            custody,
            auth,
            deadline: None,
        }
    }

    /// Bound every operation; exceeding it reports a network error
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn custody(&self) -> &KeyCustodyClient<T> {
        &self.custody
    }

    pub fn auth(&self) -> &AuthProvider<S> {
        &self.auth
    }

    /// Collect fresh nonces from the custody network and sign over them
    pub async fn issue_assertion(&self, chain: ChainId) -> Result<AuthAssertion, WorkflowError> {
        let nonces = self.custody.challenge().await?;
        Ok(self.auth.issue(chain, &nonces).await?)
    }

    async fn bounded<F, R>(&self, operation: F) -> Result<R, WorkflowError>
    where
        F: Future<Output = Result<R, WorkflowError>>,
    {
        match self.deadline {
            None => operation.await,
            Some(deadline) => match tokio::time::timeout(deadline, operation).await {
                Ok(result) => result,
                Err(_) => Err(CustodyError::Network(format!(
                    "deadline of {:?} exceeded",
                    deadline
                ))
                .into()),
            },
        }
    }

    /// Encrypt `plaintext` under a fresh key and escrow the key under `policy`
    ///
    /// All or nothing: on any failure no pair is returned. The key is dropped
    /// (and zeroed) whether or not escrow succeeds.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        policy: &AccessPolicy,
    ) -> Result<(Ciphertext, EscrowedKeyBlob), WorkflowError> {
        self.bounded(async {
            let key = SymmetricKey::generate().map_err(encryption_failed)?;
            let ciphertext = key.encrypt(plaintext.as_bytes()).map_err(encryption_failed)?;

            let assertion = self.issue_assertion(policy.chain()).await?;
            let escrowed = self.custody.escrow_key(policy, &key, &assertion).await;
            drop(key);

            let blob = escrowed?;
            tracing::info!(
                chain = %policy.chain(),
                method = policy.method(),
                "encrypted and escrowed"
            );
            Ok::<_, WorkflowError>((ciphertext, blob))
        })
        .await
    }

    pub async fn encrypt_record(
        &self,
        plaintext: &str,
        policy: &AccessPolicy,
    ) -> Result<EncryptedRecord, WorkflowError> {
        let (ciphertext, blob) = self.encrypt(plaintext, policy).await?;
        Ok(EncryptedRecord {
            ciphertext,
            blob,
            policy: policy.clone(),
        })
    }

    /// Store `data`, then encrypt its locator under `policy`
    pub async fn upload_and_encrypt<C>(
        &self,
        store: &C,
        data: Vec<u8>,
        policy: &AccessPolicy,
    ) -> Result<EncryptedRecord, WorkflowError>
    where
        C: ContentStore + ?Sized,
    {
        let locator = self
            .bounded(async { Ok::<_, WorkflowError>(store.put(data).await?) })
            .await?;
        self.encrypt_record(&locator, policy).await
    }

    /// Recover the plaintext, issuing a fresh assertion for the release
    pub async fn decrypt(
        &self,
        ciphertext: &Ciphertext,
        blob: &EscrowedKeyBlob,
        policy: &AccessPolicy,
    ) -> Result<String, WorkflowError> {
        self.bounded(async {
            let assertion = self.issue_assertion(policy.chain()).await?;
            self.release_and_decrypt(ciphertext, blob, policy, &assertion)
                .await
        })
        .await
    }

    /// Like [`decrypt`](Self::decrypt), with a caller-issued assertion
    pub async fn decrypt_with_assertion(
        &self,
        ciphertext: &Ciphertext,
        blob: &EscrowedKeyBlob,
        policy: &AccessPolicy,
        assertion: &AuthAssertion,
    ) -> Result<String, WorkflowError> {
        self.bounded(self.release_and_decrypt(ciphertext, blob, policy, assertion))
            .await
    }

    async fn release_and_decrypt(
        &self,
        ciphertext: &Ciphertext,
        blob: &EscrowedKeyBlob,
        policy: &AccessPolicy,
        assertion: &AuthAssertion,
    ) -> Result<String, WorkflowError> {
        let key = self.custody.release_key(policy, blob, assertion).await?;
        let decrypted = key.decrypt(ciphertext);
        drop(key);

        let plaintext = decrypted.map_err(|e| {
            tracing::warn!(error = %e, "released key does not match ciphertext");
            WorkflowError::DecryptionFailed(e.to_string())
        })?;
        String::from_utf8(plaintext).map_err(|e| WorkflowError::InvalidPlaintext(e.to_string()))
    }

    pub async fn decrypt_record(&self, record: &EncryptedRecord) -> Result<String, WorkflowError> {
        self.decrypt(&record.ciphertext, &record.blob, &record.policy)
            .await
    }

    /// Decrypt every record independently and concurrently
    ///
    /// Results come back in input order; one failure never affects the others.
    pub async fn batch_decrypt(
        &self,
        records: &[EncryptedRecord],
    ) -> Vec<Result<String, WorkflowError>> {
        let results = join_all(records.iter().map(|record| self.decrypt_record(record))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(total = records.len(), failed, "batch decrypt finished");
        results
    }
}

fn encryption_failed(err: SecretError) -> WorkflowError {
    WorkflowError::Encryption(err.to_string())
}
