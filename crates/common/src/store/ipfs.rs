use async_trait::async_trait;
use cid::Cid;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ContentStore, StoreError};

/// Connection settings for an IPFS HTTP API and its public gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Base URL of the HTTP API, e.g. `https://ipfs.infura.io:5001`
    pub api_url: Url,
    /// Base URL of the gateway locators point at, e.g. `https://infura-ipfs.io`
    pub gateway_url: Url,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

/// Content store backed by an IPFS node's `/api/v0/add`
///
/// Locators are gateway URLs, `{gateway}/ipfs/{cid}`.
#[derive(Debug, Clone)]
pub struct IpfsContentStore {
    config: IpfsConfig,
    client: Client,
}

impl IpfsContentStore {
    pub fn new(config: IpfsConfig) -> Result<Self, StoreError> {
        let client = Client::builder().build()?;
        Ok(Self { config, client })
    }

    pub fn locator(&self, cid: &Cid) -> Result<String, StoreError> {
        Ok(self
            .config
            .gateway_url
            .join(&format!("ipfs/{}", cid))?
            .to_string())
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, data: Vec<u8>) -> Result<String, StoreError> {
        let url = self.config.api_url.join("api/v0/add?pin=true")?;
        let form = Form::new().part("file", Part::bytes(data).file_name("upload"));

        let mut request = self.client.post(url).multipart(form);
        if let Some(project_id) = &self.config.project_id {
            request = request.basic_auth(project_id, self.config.project_secret.as_ref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::HttpStatus(
                response.status(),
                response.text().await?,
            ));
        }
        let added: AddResponse = response.json().await?;
        let cid = Cid::try_from(added.hash.as_str())
            .map_err(|e| StoreError::InvalidCid(format!("{}: {}", added.hash, e)))?;

        tracing::info!(%cid, "added content to ipfs");
        self.locator(&cid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_locator_format() {
        let store = IpfsContentStore::new(IpfsConfig {
            api_url: "https://ipfs.infura.io:5001".parse().unwrap(),
            gateway_url: "https://infura-ipfs.io".parse().unwrap(),
            project_id: None,
            project_secret: None,
        })
        .unwrap();
        let cid = Cid::try_from("QmdfTbBqBPQ7VNxZEYEj14VmRuZBkqFbiwReogJgS1zR1n").unwrap();
        assert_eq!(
            store.locator(&cid).unwrap(),
            "https://infura-ipfs.io/ipfs/QmdfTbBqBPQ7VNxZEYEj14VmRuZBkqFbiwReogJgS1zR1n"
        );
    }
}
