//! Content-addressed storage for the items whose locators get encrypted

mod blobs;
mod ipfs;

use async_trait::async_trait;
use iroh_blobs::api::{ExportBaoError, RequestError};

pub use blobs::BlobsContentStore;
pub use ipfs::{IpfsConfig, IpfsContentStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export bao error: {0}")]
    ExportBao(#[from] ExportBaoError),
    #[error("request error: {0}")]
    Request(#[from] RequestError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned HTTP {0}: {1}")]
    HttpStatus(reqwest::StatusCode, String),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("store returned an invalid content id: {0}")]
    InvalidCid(String),
}

/// A content-addressed store: opaque bytes in, locator out
///
/// The locator is whatever string the store's readers need to fetch the
/// content back; it is what gets encrypted.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, data: Vec<u8>) -> Result<String, StoreError>;
}
