//! Indicator extraction from free text
//!
//! Every indicator type owns one compiled pattern in [`INDICATOR_PATTERNS`].
//! Patterns run independently over the whole input, so a single string may
//! legitimately be reported under more than one type.
//!
//! Extraction is pure: it never touches storage. Persisting indicators is the
//! job of the investigation store.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Categories of indicators recognised by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    /// v2/v3 onion service domain
    OnionDomain,
    /// Email address
    Email,
    /// Bitcoin address (legacy or bech32)
    Bitcoin,
    /// Ethereum address
    Ethereum,
    /// IPv4 address
    Ipv4,
    /// CVE identifier
    Cve,
    /// MD5 hash
    HashMd5,
    /// SHA1 hash
    HashSha1,
    /// SHA256 hash
    HashSha256,
}

impl IndicatorType {
    /// All indicator types, in extraction order
    pub const ALL: [IndicatorType; 9] = [
        IndicatorType::OnionDomain,
        IndicatorType::Email,
        IndicatorType::Bitcoin,
        IndicatorType::Ethereum,
        IndicatorType::Ipv4,
        IndicatorType::Cve,
        IndicatorType::HashMd5,
        IndicatorType::HashSha1,
        IndicatorType::HashSha256,
    ];

    /// Stable storage name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::OnionDomain => "onion_domain",
            IndicatorType::Email => "email",
            IndicatorType::Bitcoin => "bitcoin",
            IndicatorType::Ethereum => "ethereum",
            IndicatorType::Ipv4 => "ipv4",
            IndicatorType::Cve => "cve",
            IndicatorType::HashMd5 => "hash_md5",
            IndicatorType::HashSha1 => "hash_sha1",
            IndicatorType::HashSha256 => "hash_sha256",
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown indicator type name
#[derive(Debug, Clone, Error)]
#[error("unknown indicator type: {0}")]
pub struct UnknownIndicatorType(pub String);

impl FromStr for IndicatorType {
    type Err = UnknownIndicatorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndicatorType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownIndicatorType(s.to_string()))
    }
}

/// How a raw match is turned into the stored literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Keep the literal exactly as matched
    Verbatim,
    /// Fold to lowercase
    Lowercase,
    /// Fold to uppercase
    Uppercase,
}

impl Normalization {
    fn apply(&self, value: &str) -> String {
        match self {
            Normalization::Verbatim => value.to_string(),
            Normalization::Lowercase => value.to_lowercase(),
            Normalization::Uppercase => value.to_uppercase(),
        }
    }
}

/// One row of the extraction table
pub struct IndicatorPattern {
    pub indicator_type: IndicatorType,
    pub regex: Regex,
    pub normalization: Normalization,
}

impl IndicatorPattern {
    fn new(indicator_type: IndicatorType, pattern: &str, normalization: Normalization) -> Self {
        Self {
            indicator_type,
            regex: Regex::new(pattern).unwrap(),
            normalization,
        }
    }

    /// All distinct normalized matches of this pattern in `text`
    pub fn scan(&self, text: &str) -> BTreeSet<String> {
        self.regex
            .find_iter(text)
            .map(|m| self.normalization.apply(m.as_str()))
            .collect()
    }
}

/// Type -> pattern table. Adding an indicator type means adding a row here.
pub static INDICATOR_PATTERNS: LazyLock<Vec<IndicatorPattern>> = LazyLock::new(|| {
    use IndicatorType::*;
    use Normalization::*;

    vec![
        IndicatorPattern::new(OnionDomain, r"(?i)\b[a-z2-7]{16,56}\.onion\b", Lowercase),
        IndicatorPattern::new(
            Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            Verbatim,
        ),
        IndicatorPattern::new(
            Bitcoin,
            r"\b(?:[13][a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[a-z0-9]{39,59})\b",
            Verbatim,
        ),
        IndicatorPattern::new(Ethereum, r"\b0x[a-fA-F0-9]{40}\b", Verbatim),
        IndicatorPattern::new(
            Ipv4,
            r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
            Verbatim,
        ),
        IndicatorPattern::new(Cve, r"(?i)\bCVE-\d{4}-\d{4,7}\b", Uppercase),
        IndicatorPattern::new(HashMd5, r"\b[a-fA-F0-9]{32}\b", Verbatim),
        IndicatorPattern::new(HashSha1, r"\b[a-fA-F0-9]{40}\b", Verbatim),
        IndicatorPattern::new(HashSha256, r"\b[a-fA-F0-9]{64}\b", Verbatim),
    ]
});

/// Indicators grouped by type. Only non-empty types are present.
pub type Extraction = BTreeMap<IndicatorType, BTreeSet<String>>;

/// Extract every indicator occurrence from `text`
pub fn extract_indicators(text: &str) -> Extraction {
    let mut extraction = Extraction::new();

    for pattern in INDICATOR_PATTERNS.iter() {
        let values = pattern.scan(text);
        if !values.is_empty() {
            extraction.insert(pattern.indicator_type, values);
        }
    }

    extraction
}

/// Total number of (type, value) pairs in an extraction
pub fn indicator_count(extraction: &Extraction) -> usize {
    extraction.values().map(BTreeSet::len).sum()
}

/// Flatten an extraction into (type, value) pairs in table order
pub fn indicator_pairs(extraction: &Extraction) -> impl Iterator<Item = (IndicatorType, &str)> {
    extraction
        .iter()
        .flat_map(|(t, values)| values.iter().map(move |v| (*t, v.as_str())))
}
