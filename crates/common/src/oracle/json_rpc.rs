use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::U256;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{
    ChainStateOracle, OracleError, StateQuery, BALANCE_OF_SELECTOR, ERC1155_BALANCE_OF_SELECTOR,
};
use crate::crypto::Address;
use crate::policy::{parse_quantity, ChainId, StandardContractType};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Chain state read over Ethereum JSON-RPC, one endpoint per chain
#[derive(Debug, Clone)]
pub struct JsonRpcOracle {
    endpoints: HashMap<ChainId, Url>,
    client: Client,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcOracle {
    pub fn new(endpoints: HashMap<ChainId, Url>) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| OracleError::Rpc(e.to_string()))?;
        Ok(Self {
            endpoints,
            client,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainId> {
        self.endpoints.keys()
    }

    async fn call(&self, chain: ChainId, method: &str, params: Value) -> Result<Value, OracleError> {
        let endpoint = self
            .endpoints
            .get(&chain)
            .ok_or(OracleError::UnsupportedChain(chain))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(%chain, method, id, "json-rpc request");
        let response = self
            .client
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Rpc(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OracleError::Rpc(format!(
                "endpoint returned HTTP {}",
                response.status()
            )));
        }
        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(OracleError::Rpc(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| OracleError::Decode("response has neither result nor error".into()))
    }

    async fn balance_of(&self, query: &StateQuery) -> Result<String, OracleError> {
        let contract = query.contract()?;
        let holder = query.address_parameter(0)?;
        let data = match query.standard {
            StandardContractType::Erc1155 => {
                let token_id = query.parameters.get(1).ok_or_else(|| {
                    OracleError::InvalidQuery("ERC1155 balanceOf needs a token id".into())
                })?;
                let token_id = parse_quantity(token_id).ok_or_else(|| {
                    OracleError::InvalidQuery(format!("invalid token id: {}", token_id))
                })?;
                encode_call(ERC1155_BALANCE_OF_SELECTOR, &holder, Some(token_id))
            }
            _ => encode_call(BALANCE_OF_SELECTOR, &holder, None),
        };

        let result = self
            .call(
                query.chain,
                "eth_call",
                json!([{ "to": contract.to_string(), "data": data }, "latest"]),
            )
            .await?;
        decode_quantity(&result)
    }
}

/// ABI-encode a call taking an address and an optional uint256
fn encode_call(selector: [u8; 4], holder: &Address, token_id: Option<U256>) -> String {
    let mut data = selector.to_vec();
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(holder.as_bytes());
    data.extend_from_slice(&word);
    if let Some(token_id) = token_id {
        let mut word = [0u8; 32];
        token_id.to_big_endian(&mut word);
        data.extend_from_slice(&word);
    }
    format!("0x{}", hex::encode(data))
}

fn decode_quantity(value: &Value) -> Result<String, OracleError> {
    let raw = value
        .as_str()
        .ok_or_else(|| OracleError::Decode(format!("expected a hex string, got {}", value)))?;
    // `eth_call` may answer with an empty payload for a non-contract address
    if raw == "0x" {
        return Err(OracleError::Decode("empty call result".into()));
    }
    let quantity =
        parse_quantity(raw).ok_or_else(|| OracleError::Decode(format!("not a quantity: {}", raw)))?;
    Ok(quantity.to_string())
}

#[async_trait]
impl ChainStateOracle for JsonRpcOracle {
    async fn query(&self, query: &StateQuery) -> Result<String, OracleError> {
        match (query.method.as_str(), query.standard) {
            ("eth_getBalance", StandardContractType::None) => {
                let holder = query.address_parameter(0)?;
                let block = query
                    .parameters
                    .get(1)
                    .cloned()
                    .unwrap_or_else(|| "latest".to_string());
                let result = self
                    .call(
                        query.chain,
                        "eth_getBalance",
                        json!([holder.to_string(), block]),
                    )
                    .await?;
                decode_quantity(&result)
            }
            ("balanceOf", StandardContractType::Erc20)
            | ("balanceOf", StandardContractType::Erc721)
            | ("balanceOf", StandardContractType::Erc1155) => self.balance_of(query).await,
            (method, standard) => Err(OracleError::UnsupportedMethod {
                method: method.to_string(),
                standard,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_balance_of() {
        let holder: Address = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
        let data = encode_call(BALANCE_OF_SELECTOR, &holder, None);
        assert_eq!(
            data,
            "0x70a08231\
             0000000000000000000000007e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );

        let data = encode_call(ERC1155_BALANCE_OF_SELECTOR, &holder, Some(U256::from(5u64)));
        assert!(data.starts_with("0x00fdd58e"));
        assert!(data.ends_with("05"));
        assert_eq!(data.len(), 2 + 2 * (4 + 32 + 32));
    }

    #[test]
    fn test_decode_quantity() {
        assert_eq!(
            decode_quantity(&json!("0x9184e72a000")).unwrap(),
            "10000000000000"
        );
        assert_eq!(
            decode_quantity(&json!(
                "0x0000000000000000000000000000000000000000000000000000000000000001"
            ))
            .unwrap(),
            "1"
        );
        assert!(decode_quantity(&json!("0x")).is_err());
        assert!(decode_quantity(&json!(12)).is_err());
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let oracle = JsonRpcOracle::new(HashMap::new()).unwrap();
        let query = StateQuery {
            chain: ChainId::Optimism,
            contract_address: None,
            standard: StandardContractType::None,
            method: "eth_getBalance".into(),
            parameters: vec![
                "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".into(),
                "latest".into(),
            ],
        };
        assert_eq!(
            oracle.query(&query).await,
            Err(OracleError::UnsupportedChain(ChainId::Optimism))
        );
    }
}
