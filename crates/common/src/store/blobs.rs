use std::future::IntoFuture;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use iroh_blobs::{
    api::blobs::{BlobStatus, Blobs},
    store::{fs::FsStore, mem::MemStore},
    BlobsProtocol, Hash,
};

use super::{ContentStore, StoreError};

/// Content store over a local iroh-blobs store
///
/// Locators are the BLAKE3 hash of the content, hex encoded.
#[derive(Clone, Debug)]
pub struct BlobsContentStore {
    inner: Arc<BlobsProtocol>,
}

impl BlobsContentStore {
    /// Load (or create) a store on disk
    pub async fn fs(path: &Path) -> Result<Self, StoreError> {
        tracing::debug!(?path, "loading blobs store");
        let store = FsStore::load(path).await?;
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    pub async fn memory() -> Result<Self, StoreError> {
        let store = MemStore::new();
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    pub fn blobs(&self) -> &Blobs {
        self.inner.store().blobs()
    }

    pub async fn get(&self, hash: &Hash) -> Result<Bytes, StoreError> {
        let bytes = self.blobs().get_bytes(*hash).await?;
        Ok(bytes)
    }

    /// Fetch content by the locator `put` returned
    pub async fn get_locator(&self, locator: &str) -> Result<Bytes, StoreError> {
        let hash = Hash::from_str(locator).map_err(|e| anyhow!("invalid locator: {}", e))?;
        self.get(&hash).await
    }

    pub async fn stat(&self, hash: &Hash) -> Result<bool, StoreError> {
        let stat = self
            .blobs()
            .status(*hash)
            .await
            .map_err(|err| StoreError::Default(anyhow!(err)))?;
        Ok(matches!(stat, BlobStatus::Complete { .. }))
    }
}

#[async_trait]
impl ContentStore for BlobsContentStore {
    async fn put(&self, data: Vec<u8>) -> Result<String, StoreError> {
        let hash = self.blobs().add_bytes(data).into_future().await?.hash;
        tracing::debug!(%hash, "stored blob");
        Ok(hash.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_returns_content_locator() {
        let store = BlobsContentStore::memory().await.unwrap();
        let locator = store.put(b"hello warden".to_vec()).await.unwrap();
        assert_eq!(locator, Hash::new(b"hello warden").to_string());
        assert_eq!(
            store.get_locator(&locator).await.unwrap().as_ref(),
            b"hello warden"
        );
    }

    #[tokio::test]
    async fn test_fs_store() {
        let temp = TempDir::new().unwrap();
        let store = BlobsContentStore::fs(&temp.path().join("blobs"))
            .await
            .unwrap();

        let first = store.put(b"first".to_vec()).await.unwrap();
        let second = store.put(b"second".to_vec()).await.unwrap();
        assert_ne!(first, second);
        // same bytes, same locator
        assert_eq!(store.put(b"first".to_vec()).await.unwrap(), first);

        let hash = Hash::from_str(&first).unwrap();
        assert!(store.stat(&hash).await.unwrap());
        assert!(!store.stat(&Hash::from_bytes([7u8; 32])).await.unwrap());
    }
}
