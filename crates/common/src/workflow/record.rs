use serde::{Deserialize, Serialize};

use crate::crypto::{Ciphertext, EscrowedKeyBlob};
use crate::policy::AccessPolicy;

/// The unit of storage: a ciphertext with the only blob that unlocks it
///
/// Persist and move these as a whole; a ciphertext separated from its blob
/// can never be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedRecord {
    pub ciphertext: Ciphertext,
    pub blob: EscrowedKeyBlob,
    pub policy: AccessPolicy,
}

impl EncryptedRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{deal, SymmetricKey};
    use crate::policy::ChainId;

    #[test]
    fn test_record_json() {
        let (network_key, _) = deal(1, 1).unwrap();
        let policy = AccessPolicy::native_balance_at_least(ChainId::Ethereum, "1").unwrap();
        let key = SymmetricKey::generate().unwrap();
        let record = EncryptedRecord {
            ciphertext: key.encrypt(b"ipfs://Qm123").unwrap(),
            blob: EscrowedKeyBlob::wrap(&key, &network_key, &policy.digest()).unwrap(),
            policy,
        };

        let json = record.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["ciphertext"].is_string());
        assert!(value["blob"].is_string());
        assert_eq!(value["policy"]["method"], "eth_getBalance");

        assert_eq!(EncryptedRecord::from_json(&json).unwrap(), record);
    }
}
