use std::fmt;
use std::str::FromStr;

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};

use super::PolicyError;

/// Token standard the queried contract implements, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StandardContractType {
    /// Native-asset checks (e.g. `eth_getBalance`), no contract involved
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "ERC20")]
    Erc20,
    #[serde(rename = "ERC721")]
    Erc721,
    #[serde(rename = "ERC1155")]
    Erc1155,
}

impl FromStr for StandardContractType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(StandardContractType::None),
            "ERC20" => Ok(StandardContractType::Erc20),
            "ERC721" => Ok(StandardContractType::Erc721),
            "ERC1155" => Ok(StandardContractType::Erc1155),
            _ => Err(PolicyError::UnknownContractType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=", alias = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Neq => "!=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
        }
    }

    /// Ordering comparators only make sense over numbers
    pub fn requires_numeric(&self) -> bool {
        !matches!(self, Comparator::Eq | Comparator::Neq)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparator {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Neq),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Gte),
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Lte),
            other => Err(PolicyError::UnknownComparator(other.to_string())),
        }
    }
}

/// Parse an unsigned 256-bit quantity, decimal or `0x` hex
pub fn parse_quantity(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None if s.bytes().all(|b| b.is_ascii_digit()) => U256::from_dec_str(s).ok(),
        None => None,
    }
}

/// The predicate applied to the value read from chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: Comparator,
    pub value: String,
}

impl ReturnValueTest {
    pub fn new(comparator: Comparator, value: impl Into<String>) -> Result<Self, PolicyError> {
        let test = ReturnValueTest {
            comparator,
            value: value.into(),
        };
        test.validate()?;
        Ok(test)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = || PolicyError::InvalidValue {
            comparator: self.comparator.symbol().to_string(),
            value: self.value.clone(),
        };
        if self.comparator.requires_numeric() {
            if self.value.trim().starts_with("0x") || parse_quantity(&self.value).is_none() {
                return Err(invalid());
            }
        } else if self.value.trim().is_empty() {
            return Err(invalid());
        }
        Ok(())
    }

    /// Whether the observed on-chain value satisfies this test
    ///
    /// Numbers are compared as 256-bit integers; non-numeric equality compares
    /// case-insensitively so checksummed and lowercase addresses agree.
    pub fn holds(&self, observed: &str) -> Result<bool, PolicyError> {
        let expected = parse_quantity(&self.value);
        let actual = parse_quantity(observed);

        match (self.comparator, expected, actual) {
            (Comparator::Eq, Some(e), Some(a)) => Ok(a == e),
            (Comparator::Neq, Some(e), Some(a)) => Ok(a != e),
            (Comparator::Eq, _, _) => Ok(observed.trim().eq_ignore_ascii_case(self.value.trim())),
            (Comparator::Neq, _, _) => {
                Ok(!observed.trim().eq_ignore_ascii_case(self.value.trim()))
            }
            (comparator, Some(e), Some(a)) => Ok(match comparator {
                Comparator::Gt => a > e,
                Comparator::Gte => a >= e,
                Comparator::Lt => a < e,
                Comparator::Lte => a <= e,
                Comparator::Eq | Comparator::Neq => unreachable!("handled above"),
            }),
            (_, None, _) => Err(PolicyError::InvalidValue {
                comparator: self.comparator.symbol().to_string(),
                value: self.value.clone(),
            }),
            (_, _, None) => Err(PolicyError::UnexpectedObservedValue(observed.to_string())),
        }
    }
}
