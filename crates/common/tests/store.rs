//! Integration tests for upload-then-encrypt against a local blobs store

mod common;

use ::common::store::BlobsContentStore;
use tempfile::TempDir;

#[tokio::test]
async fn test_upload_and_encrypt() {
    let temp_dir = TempDir::new().unwrap();
    let store = BlobsContentStore::fs(&temp_dir.path().join("blobs"))
        .await
        .unwrap();
    let net = common::setup_test_env();
    let policy = common::balance_policy();
    let alice = net.workflow("alice").unwrap();

    let record = alice
        .upload_and_encrypt(&store, b"the actual content".to_vec(), &policy)
        .await
        .unwrap();
    assert_eq!(record.policy, policy);

    let locator = alice.decrypt_record(&record).await.unwrap();
    let content = store.get_locator(&locator).await.unwrap();
    assert_eq!(content.as_ref(), b"the actual content");
}

#[tokio::test]
async fn test_upload_denied_requester_sees_nothing() {
    let store = BlobsContentStore::memory().await.unwrap();
    let net = common::setup_test_env();
    let policy = common::balance_policy();
    let alice = net.workflow("alice").unwrap();
    let bob = net.workflow("bob").unwrap();

    let record = alice
        .upload_and_encrypt(&store, b"members only".to_vec(), &policy)
        .await
        .unwrap();
    let err = bob.decrypt_record(&record).await.unwrap_err();
    assert!(err.is_policy_not_satisfied());
}
