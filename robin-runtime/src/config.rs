//! Runtime configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use robin_core::{active_engines, default_engines, SearchEngine};
use robin_tor::{AggregatorConfig, RetrieverConfig, TorConfig};

pub const ENV_TOR_PROXY: &str = "ROBIN_TOR_PROXY";
pub const ENV_DB_PATH: &str = "ROBIN_DB_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    pub max_workers: usize,
    pub per_source_timeout_secs: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            max_workers: 5,
            per_source_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverSection {
    pub max_workers: usize,
    pub per_item_timeout_secs: u64,
    /// Characters of page text kept per page
    pub max_chars: usize,
}

impl Default for RetrieverSection {
    fn default() -> Self {
        Self {
            max_workers: 5,
            per_item_timeout_secs: 45,
            max_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub top_k: usize,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self { top_k: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("robin_memory.db"),
            retention_days: 90,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobinConfig {
    pub tor: TorConfig,
    pub aggregator: AggregatorSection,
    pub retriever: RetrieverSection,
    pub selector: SelectorSection,
    pub store: StoreSection,
    /// Replaces the built-in source registry when present
    pub sources: Option<Vec<SearchEngine>>,
}

impl RobinConfig {
    /// Load from a TOML file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults; env overrides either way
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(proxy) = lookup(ENV_TOR_PROXY).filter(|v| !v.is_empty()) {
            self.tor.socks_addr = proxy;
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.store.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregator.max_workers == 0 || self.retriever.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".to_string()));
        }
        if self.selector.top_k == 0 {
            return Err(ConfigError::Invalid("selector.top_k must be at least 1".to_string()));
        }
        if self.retriever.max_chars == 0 {
            return Err(ConfigError::Invalid("retriever.max_chars must be at least 1".to_string()));
        }
        if let Some(sources) = &self.sources {
            if let Some(bad) = sources.iter().find(|s| !s.url_template.contains("{query}")) {
                return Err(ConfigError::Invalid(format!(
                    "source {} has no {{query}} placeholder",
                    bad.name
                )));
            }
        }
        Ok(())
    }

    /// Active sources, in query order
    pub fn engines(&self) -> Vec<SearchEngine> {
        match &self.sources {
            Some(sources) => active_engines(sources),
            None => default_engines(),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_workers: self.aggregator.max_workers,
            per_source_timeout: Duration::from_secs(self.aggregator.per_source_timeout_secs),
        }
    }

    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            max_workers: self.retriever.max_workers,
            per_item_timeout: Duration::from_secs(self.retriever.per_item_timeout_secs),
            max_chars: self.retriever.max_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        let config = RobinConfig::from_toml_str("").unwrap();
        assert_eq!(config.tor.socks_addr, "socks5h://127.0.0.1:9050");
        assert_eq!(config.aggregator.max_workers, 5);
        assert_eq!(config.retriever.max_chars, 2000);
        assert_eq!(config.selector.top_k, 20);
        assert_eq!(config.store.retention_days, 90);
        assert_eq!(config.engines().len(), 21);
    }

    #[test]
    fn test_partial_sections() {
        let config = RobinConfig::from_toml_str(
            r#"
            [tor]
            max_retries = 1

            [retriever]
            max_chars = 500

            [[sources]]
            name = "Local"
            url_template = "http://localsearchabcdefgh.onion/?q={query}"

            [[sources]]
            name = "Disabled"
            url_template = "http://disabledabcdefgh.onion/?q={query}"
            active = false
            "#,
        )
        .unwrap();

        assert_eq!(config.tor.max_retries, 1);
        assert_eq!(config.tor.timeout_secs, 45);
        assert_eq!(config.retriever_config().max_chars, 500);
        assert_eq!(config.retriever_config().per_item_timeout, Duration::from_secs(45));
        let engines = config.engines();
        assert_eq!(engines.len(), 1);
        assert_eq!(engines[0].name, "Local");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RobinConfig::from_toml_str("[selector]\ntop_k = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RobinConfig::from_toml_str("[[sources]]\nname = \"X\"\nurl_template = \"http://x.onion/\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(RobinConfig::from_toml_str("[tor"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RobinConfig::default();
        config.apply_overrides(|key| match key {
            ENV_TOR_PROXY => Some("socks5h://10.0.0.2:9150".to_string()),
            ENV_DB_PATH => Some("/var/lib/robin/memory.db".to_string()),
            _ => None,
        });
        assert_eq!(config.tor.socks_addr, "socks5h://10.0.0.2:9150");
        assert_eq!(config.store.path, PathBuf::from("/var/lib/robin/memory.db"));
    }

    #[test]
    fn test_missing_file() {
        let err = RobinConfig::load(Path::new("/nonexistent/robin.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
