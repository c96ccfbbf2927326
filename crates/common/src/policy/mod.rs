//! Access policies
//!
//! A policy is a single predicate over on-chain state: call `method` with
//! `parameters` (against `contractAddress` when the method targets a contract)
//! on `chain`, then apply `returnValueTest` to the result. The JSON shape is
//! the common access-control-condition format:
//!
//! ```json
//! {
//!   "contractAddress": "0x89b597199dac806ceecfc091e56044d34e59985c",
//!   "standardContractType": "ERC721",
//!   "chain": "ethereum",
//!   "method": "balanceOf",
//!   "parameters": [":userAddress"],
//!   "returnValueTest": { "comparator": ">", "value": "0" }
//! }
//! ```
//!
//! Policies are validated whenever they are constructed or deserialized, so a
//! value of type [`AccessPolicy`] is always well formed.

mod chain;
mod condition;

use serde::{Deserialize, Serialize};

use crate::crypto::{Address, POLICY_DIGEST_SIZE};

pub use chain::ChainId;
pub use condition::{parse_quantity, Comparator, ReturnValueTest, StandardContractType};

/// Parameter token replaced by the requester's address at evaluation time
pub const USER_ADDRESS_PLACEHOLDER: &str = ":userAddress";

const DIGEST_CONTEXT: &str = "warden 2024-06 access policy digest v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PolicyError {
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("unknown standard contract type: {0}")]
    UnknownContractType(String),
    #[error("unknown comparator: {0}")]
    UnknownComparator(String),
    #[error("invalid contract address: {0:?}")]
    InvalidContractAddress(String),
    #[error("policy method is empty")]
    EmptyMethod,
    #[error("policy has no return value test")]
    MissingReturnValueTest,
    #[error("value {value:?} is not valid for comparator {comparator}")]
    InvalidValue { comparator: String, value: String },
    #[error("chain returned a value that cannot be compared: {0:?}")]
    UnexpectedObservedValue(String),
    #[error("malformed policy: {0}")]
    Malformed(String),
}

/// Unvalidated wire form of a policy
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccessPolicy {
    #[serde(default)]
    contract_address: String,
    #[serde(default)]
    standard_contract_type: StandardContractType,
    chain: ChainId,
    method: String,
    #[serde(default)]
    parameters: Vec<String>,
    return_value_test: ReturnValueTest,
}

impl TryFrom<RawAccessPolicy> for AccessPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawAccessPolicy) -> Result<Self, Self::Error> {
        let policy = AccessPolicy {
            contract_address: raw.contract_address.trim().to_ascii_lowercase(),
            standard_contract_type: raw.standard_contract_type,
            chain: raw.chain,
            method: raw.method,
            parameters: raw.parameters,
            return_value_test: raw.return_value_test,
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// A validated, immutable access policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawAccessPolicy")]
pub struct AccessPolicy {
    contract_address: String,
    standard_contract_type: StandardContractType,
    chain: ChainId,
    method: String,
    parameters: Vec<String>,
    return_value_test: ReturnValueTest,
}

impl AccessPolicy {
    pub fn builder(chain: ChainId) -> AccessPolicyBuilder {
        AccessPolicyBuilder::new(chain)
    }

    /// Holds when the requester's native balance is at least `wei`
    pub fn native_balance_at_least(chain: ChainId, wei: &str) -> Result<Self, PolicyError> {
        AccessPolicy::builder(chain)
            .method("eth_getBalance")
            .parameters([USER_ADDRESS_PLACEHOLDER, "latest"])
            .return_value_test(Comparator::Gte, wei)
            .build()
    }

    /// Holds when the requester owns at least one token of an ERC721 collection
    pub fn erc721_holder(chain: ChainId, contract: Address) -> Result<Self, PolicyError> {
        AccessPolicy::builder(chain)
            .contract(contract, StandardContractType::Erc721)
            .method("balanceOf")
            .parameters([USER_ADDRESS_PLACEHOLDER])
            .return_value_test(Comparator::Gt, "0")
            .build()
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(json).map_err(|e| PolicyError::Malformed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let contract_required = self.standard_contract_type != StandardContractType::None;
        if (contract_required || !self.contract_address.is_empty())
            && !Address::is_valid(&self.contract_address)
        {
            return Err(PolicyError::InvalidContractAddress(
                self.contract_address.clone(),
            ));
        }
        if self.method.trim().is_empty() {
            return Err(PolicyError::EmptyMethod);
        }
        self.return_value_test.validate()
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Raw contract address, empty for native-asset checks
    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub fn contract(&self) -> Option<Address> {
        self.contract_address.parse().ok()
    }

    pub fn standard_contract_type(&self) -> StandardContractType {
        self.standard_contract_type
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn return_value_test(&self) -> &ReturnValueTest {
        &self.return_value_test
    }

    /// Parameters with every placeholder replaced by `requester`
    pub fn resolve_parameters(&self, requester: &Address) -> Vec<String> {
        let requester = requester.to_string();
        self.parameters
            .iter()
            .map(|p| {
                if p == USER_ADDRESS_PLACEHOLDER {
                    requester.clone()
                } else {
                    p.clone()
                }
            })
            .collect()
    }

    /// Digest binding an escrowed key to exactly this policy
    ///
    /// Fields are hashed length-prefixed in declaration order, so two policies
    /// share a digest iff they are structurally equal.
    pub fn digest(&self) -> [u8; POLICY_DIGEST_SIZE] {
        let mut hasher = blake3::Hasher::new_derive_key(DIGEST_CONTEXT);
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(self.contract_address.as_bytes());
        field(contract_type_tag(self.standard_contract_type).as_bytes());
        field(self.chain.name().as_bytes());
        field(self.method.as_bytes());
        field(&(self.parameters.len() as u64).to_le_bytes());
        for parameter in &self.parameters {
            field(parameter.as_bytes());
        }
        field(self.return_value_test.comparator.symbol().as_bytes());
        field(self.return_value_test.value.as_bytes());
        *hasher.finalize().as_bytes()
    }
}

fn contract_type_tag(kind: StandardContractType) -> &'static str {
    match kind {
        StandardContractType::None => "",
        StandardContractType::Erc20 => "ERC20",
        StandardContractType::Erc721 => "ERC721",
        StandardContractType::Erc1155 => "ERC1155",
    }
}

#[derive(Debug, Clone)]
pub struct AccessPolicyBuilder {
    chain: ChainId,
    contract_address: String,
    standard_contract_type: StandardContractType,
    method: String,
    parameters: Vec<String>,
    return_value_test: Option<(Comparator, String)>,
}

impl AccessPolicyBuilder {
    fn new(chain: ChainId) -> Self {
        Self {
            chain,
            contract_address: String::new(),
            standard_contract_type: StandardContractType::None,
            method: String::new(),
            parameters: Vec::new(),
            return_value_test: None,
        }
    }

    pub fn contract(mut self, address: Address, kind: StandardContractType) -> Self {
        self.contract_address = address.to_string();
        self.standard_contract_type = kind;
        self
    }

    /// Set the contract address from an unchecked string; checked in `build`
    pub fn contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = address.into().trim().to_ascii_lowercase();
        self
    }

    pub fn standard_contract_type(mut self, kind: StandardContractType) -> Self {
        self.standard_contract_type = kind;
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn parameters<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn return_value_test(mut self, comparator: Comparator, value: impl Into<String>) -> Self {
        self.return_value_test = Some((comparator, value.into()));
        self
    }

    pub fn build(self) -> Result<AccessPolicy, PolicyError> {
        let (comparator, value) = self
            .return_value_test
            .ok_or(PolicyError::MissingReturnValueTest)?;
        let policy = AccessPolicy {
            contract_address: self.contract_address,
            standard_contract_type: self.standard_contract_type,
            chain: self.chain,
            method: self.method,
            parameters: self.parameters,
            return_value_test: ReturnValueTest { comparator, value },
        };
        policy.validate()?;
        Ok(policy)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MONSTER_SUIT: &str = "0x89b597199dac806ceecfc091e56044d34e59985c";

    #[test]
    fn test_parse_condition_json() {
        let json = r#"{
            "contractAddress": "0x89B597199DAC806CEECFC091E56044D34E59985C",
            "standardContractType": "ERC721",
            "chain": "ethereum",
            "method": "balanceOf",
            "parameters": [":userAddress"],
            "returnValueTest": { "comparator": ">", "value": "0" }
        }"#;
        let policy = AccessPolicy::from_json(json).unwrap();
        let expected =
            AccessPolicy::erc721_holder(ChainId::Ethereum, MONSTER_SUIT.parse().unwrap()).unwrap();
        assert_eq!(policy, expected);
        assert_eq!(policy.digest(), expected.digest());
    }

    #[test]
    fn test_native_balance_json_shape() {
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "10000000000000")
            .unwrap();
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["contractAddress"], "");
        assert_eq!(value["standardContractType"], "");
        assert_eq!(value["chain"], "ethereum");
        assert_eq!(value["method"], "eth_getBalance");
        assert_eq!(value["parameters"][0], ":userAddress");
        assert_eq!(value["parameters"][1], "latest");
        assert_eq!(value["returnValueTest"]["comparator"], ">=");
        assert_eq!(value["returnValueTest"]["value"], "10000000000000");

        let back: AccessPolicy = serde_json::from_value(value).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_rejects_malformed_policies() {
        let missing_contract = AccessPolicy::builder(ChainId::Ethereum)
            .standard_contract_type(StandardContractType::Erc721)
            .method("balanceOf")
            .return_value_test(Comparator::Gt, "0")
            .build();
        assert!(matches!(
            missing_contract,
            Err(PolicyError::InvalidContractAddress(_))
        ));

        let bad_value = AccessPolicy::builder(ChainId::Ethereum)
            .method("eth_getBalance")
            .return_value_test(Comparator::Gte, "lots")
            .build();
        assert!(matches!(bad_value, Err(PolicyError::InvalidValue { .. })));

        let no_method = AccessPolicy::builder(ChainId::Ethereum)
            .return_value_test(Comparator::Gte, "1")
            .build();
        assert_eq!(no_method, Err(PolicyError::EmptyMethod));

        let no_test = AccessPolicy::builder(ChainId::Ethereum)
            .method("eth_getBalance")
            .build();
        assert_eq!(no_test, Err(PolicyError::MissingReturnValueTest));
    }

    #[test]
    fn test_deserialize_validates() {
        let unknown_chain = r#"{"chain":"dogechain","method":"eth_getBalance",
            "returnValueTest":{"comparator":">","value":"0"}}"#;
        assert!(AccessPolicy::from_json(unknown_chain).is_err());

        let bad_address = r#"{"contractAddress":"0x1234","standardContractType":"ERC20",
            "chain":"ethereum","method":"balanceOf","parameters":[":userAddress"],
            "returnValueTest":{"comparator":">","value":"0"}}"#;
        assert!(matches!(
            AccessPolicy::from_json(bad_address),
            Err(PolicyError::Malformed(_))
        ));
    }

    #[test]
    fn test_resolve_parameters() {
        let policy = AccessPolicy::native_balance_at_least(ChainId::Sepolia, "1").unwrap();
        let requester: Address = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
        assert_eq!(
            policy.resolve_parameters(&requester),
            vec![
                "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".to_string(),
                "latest".to_string()
            ]
        );
        // the policy itself keeps the placeholder
        assert_eq!(policy.parameters()[0], USER_ADDRESS_PLACEHOLDER);
    }

    #[test]
    fn test_digest_is_structural() {
        let a = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "100").unwrap();
        let b = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "100").unwrap();
        let c = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "101").unwrap();
        let d = AccessPolicy::native_balance_at_least(ChainId::Polygon, "100").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_ne!(a.digest(), d.digest());
    }

    #[test]
    fn test_policy_error_wire_format() {
        let err = PolicyError::InvalidValue {
            comparator: ">".to_string(),
            value: "x".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(serde_json::from_str::<PolicyError>(&json).unwrap(), err);
    }
}
