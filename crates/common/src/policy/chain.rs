use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PolicyError;

/// Networks a policy may be evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Sepolia,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
}

impl ChainId {
    pub const ALL: [ChainId; 6] = [
        ChainId::Ethereum,
        ChainId::Sepolia,
        ChainId::Polygon,
        ChainId::Arbitrum,
        ChainId::Optimism,
        ChainId::Base,
    ];

    /// EIP-155 chain id
    pub fn numeric_id(&self) -> u64 {
        match self {
            ChainId::Ethereum => 1,
            ChainId::Sepolia => 11155111,
            ChainId::Polygon => 137,
            ChainId::Arbitrum => 42161,
            ChainId::Optimism => 10,
            ChainId::Base => 8453,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Sepolia => "sepolia",
            ChainId::Polygon => "polygon",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Optimism => "optimism",
            ChainId::Base => "base",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainId {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ChainId::ALL
            .into_iter()
            .find(|chain| chain.name() == lowered)
            .ok_or_else(|| PolicyError::UnknownChain(s.to_string()))
    }
}
