//! CLI command definitions and handlers.

use crate::config::{LogFormat, ProxyConfig, StoreKind};
use clap::Subcommand;
use pagecache_core::{CacheKey, KeyNamespace};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the caching proxy
    Serve {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured log format
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,
    },

    /// Validate configuration and print the effective rules
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the store keys used for a path and query
    Key {
        /// Request path including the query string, e.g. `/products?page=2`
        path_and_query: String,

        /// Key namespace
        #[arg(short, long, default_value = KeyNamespace::DEFAULT)]
        namespace: String,
    },
}

/// Render the effective configuration for `check`.
pub fn check(path: Option<&Path>) -> anyhow::Result<String> {
    let config = ProxyConfig::load(path)?;

    let mut out = String::new();
    out.push_str(&format!("listen:    {}\n", config.listen));
    out.push_str(&format!("upstream:  {}\n", config.upstream_url()?));
    out.push_str(&format!("namespace: {}\n", config.namespace));
    match config.store.kind {
        StoreKind::Memory => out.push_str("store:     memory\n"),
        StoreKind::Memcached => {
            out.push_str(&format!("store:     memcached ({})\n", config.store.address))
        }
    }
    if config.rules.is_empty() {
        out.push_str("rules:     none, every request bypasses the cache\n");
    } else {
        out.push_str("rules:\n");
        out.push_str(&serde_yaml::to_string(&config.rules)?);
    }
    Ok(out)
}

/// Render the digest and store keys for `key`.
pub fn key(path_and_query: &str, namespace: &str) -> anyhow::Result<String> {
    let namespace = KeyNamespace::new(namespace)?;
    let key = CacheKey::derive(path_and_query);

    Ok(format!(
        "digest: {}\ndata:   {}\nlock:   {}\n",
        key,
        namespace.data_key(&key),
        namespace.lock_key(&key)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_output() {
        let out = key("/products?page=2", "shop").unwrap();
        let digest = CacheKey::derive("/products?page=2");

        assert!(out.contains(&format!("data:   shop:data:{digest}")));
        assert!(out.contains(&format!("lock:   shop:lock:{digest}")));
    }

    #[test]
    fn test_key_rejects_bad_namespace() {
        assert!(key("/", "").is_err());
    }
}
