//! Cryptocurrency address format analysis
//!
//! Format-level classification only. No checksum validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static BTC_LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").unwrap());

static BTC_BECH32: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^bc1[a-z0-9]{39,59}$").unwrap());

static ETH_ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap());

/// Blockchain a given address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

/// Restricts which chain formats are considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainHint {
    #[default]
    Auto,
    Bitcoin,
    Ethereum,
}

/// Result of analysing an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressAnalysis {
    pub address: String,
    pub valid: bool,
    pub chain: Option<Chain>,
    /// Address format, e.g. "legacy (P2PKH)"
    pub format: Option<String>,
    pub details: String,
}

/// Classify a cryptocurrency address by format
pub fn analyze_address(address: &str, hint: ChainHint) -> AddressAnalysis {
    let address = address.trim();
    let try_bitcoin = matches!(hint, ChainHint::Auto | ChainHint::Bitcoin);
    let try_ethereum = matches!(hint, ChainHint::Auto | ChainHint::Ethereum);

    let classified = if try_bitcoin && BTC_LEGACY.is_match(address) {
        let format = if address.starts_with('1') {
            "legacy (P2PKH)"
        } else {
            "P2SH"
        };
        Some((Chain::Bitcoin, format, "Bitcoin legacy address"))
    } else if try_bitcoin && BTC_BECH32.is_match(&address.to_lowercase()) {
        Some((Chain::Bitcoin, "segwit (Bech32)", "Bitcoin SegWit address"))
    } else if try_ethereum && ETH_ADDRESS.is_match(address) {
        Some((Chain::Ethereum, "standard", "Ethereum address (ERC-20 compatible)"))
    } else {
        None
    };

    match classified {
        Some((chain, format, details)) => AddressAnalysis {
            address: address.to_string(),
            valid: true,
            chain: Some(chain),
            format: Some(format.to_string()),
            details: details.to_string(),
        },
        None => AddressAnalysis {
            address: address.to_string(),
            valid: false,
            chain: None,
            format: None,
            details: "Unknown or invalid cryptocurrency address format".to_string(),
        },
    }
}
