//! Proxy configuration.
//!
//! Loaded from a YAML or TOML file, then overridden by `PAGECACHE__*`
//! environment variables (`PAGECACHE__STORE__ADDRESS=10.0.0.5:11211`).

use config::{Config, Environment, File, FileFormat};
use pagecache_core::{CacheRule, KeyNamespace, RuleSet};
use pagecache_http::DEFAULT_MAX_BODY_BYTES;
use pagecache_store::MemcachedConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid upstream URL {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error(transparent)]
    Core(#[from] pagecache_core::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store; nothing is shared between instances.
    #[default]
    Memory,
    Memcached,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_namespace() -> String {
    KeyNamespace::DEFAULT.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_store_address() -> String {
    "127.0.0.1:11211".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    500
}

/// Key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,
    /// memcached server (`host:port`).
    #[serde(default = "default_store_address")]
    pub address: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            address: default_store_address(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl StoreSettings {
    pub fn memcached_config(&self) -> MemcachedConfig {
        MemcachedConfig::new(self.address.clone())
            .with_pool_size(self.pool_size)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }
}

/// Proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Base URL requests are forwarded to.
    pub upstream: String,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
    #[serde(default)]
    pub store: StoreSettings,
    /// Prefix of every store key.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Ordered cache rules; the first matching prefix wins.
    #[serde(default)]
    pub rules: Vec<CacheRule>,
}

impl ProxyConfig {
    /// Load from an optional file plus the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::build(builder)
    }

    /// Parse a YAML document plus the environment, then validate.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(source, FileFormat::Yaml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: ProxyConfig = builder
            .add_source(
                Environment::with_prefix("PAGECACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything that would only surface at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream_url()?;
        self.rule_set()?;
        self.key_namespace()?;

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream_timeout_secs must be positive".into(),
            ));
        }
        if self.store.kind == StoreKind::Memcached {
            if self.store.address.is_empty() {
                return Err(ConfigError::Invalid("store.address is required".into()));
            }
            if self.store.pool_size == 0 {
                return Err(ConfigError::Invalid("store.pool_size must be positive".into()));
            }
        }
        Ok(())
    }

    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUpstream {
            url: self.upstream.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(&self.upstream).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not carry a query or fragment"));
        }
        Ok(url)
    }

    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        Ok(RuleSet::new(self.rules.clone())?)
    }

    pub fn key_namespace(&self) -> Result<KeyNamespace, ConfigError> {
        Ok(KeyNamespace::new(self.namespace.clone())?)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
listen: "0.0.0.0:9000"
upstream: "http://127.0.0.1:3000/app"
namespace: "shop"
store:
  kind: memcached
  address: "cache.internal:11211"
  pool_size: 4
rules:
  - url_prefix: "/products"
    ttl_seconds: 60
    grace_seconds: 30
  - url_prefix: "/"
    ttl_seconds: 5
"#;

    #[test]
    fn test_parse_full_config() {
        let config = ProxyConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(config.listen, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.namespace, "shop");
        assert_eq!(config.store.kind, StoreKind::Memcached);
        assert_eq!(config.store.pool_size, 4);
        assert_eq!(config.store.request_timeout_ms, 500);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.log_format, LogFormat::Text);

        let rules = config.rule_set().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.match_path("/products/1").unwrap().ttl_seconds, 60);
        assert_eq!(rules.match_path("/about").unwrap().grace_seconds, 0);
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::from_yaml("upstream: \"http://localhost:3000\"").unwrap();

        assert_eq!(config.listen, default_listen());
        assert_eq!(config.namespace, "pagecache");
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_memcached_config() {
        let config = ProxyConfig::from_yaml(CONFIG).unwrap();
        let memcached = config.store.memcached_config();

        assert_eq!(memcached.address, "cache.internal:11211");
        assert_eq!(memcached.pool_size, 4);
        assert_eq!(memcached.connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_rule_fails_fast() {
        let source = r#"
upstream: "http://localhost:3000"
rules:
  - url_prefix: "products"
    ttl_seconds: 60
"#;
        let err = ProxyConfig::from_yaml(source).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Core(pagecache_core::Error::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_invalid_upstream() {
        for upstream in ["ftp://localhost", "not a url", "http://localhost/?q=1"] {
            let source = format!("upstream: \"{upstream}\"");
            let err = ProxyConfig::from_yaml(&source).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidUpstream { .. }),
                "{upstream}: {err}"
            );
        }
    }

    #[test]
    fn test_missing_upstream() {
        let err = ProxyConfig::from_yaml("namespace: \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_invalid_namespace() {
        let source = "upstream: \"http://localhost\"\nnamespace: \"has space\"";
        let err = ProxyConfig::from_yaml(source).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Core(pagecache_core::Error::InvalidNamespace(_))
        ));
    }
}
