//! Cache key derivation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest key memcached accepts.
const MAX_STORE_KEY_LEN: usize = 250;

/// Hex SHA-256 digest of a request's raw path and query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a path and query string. No normalisation is applied.
    pub fn derive(path_and_query: &str) -> Self {
        let digest = Sha256::digest(path_and_query.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix under which data and lock keys are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace(String);

impl KeyNamespace {
    pub const DEFAULT: &'static str = "pagecache";

    pub fn new(namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        // ":data:" plus a 64 character digest
        let longest = namespace.len() + 6 + 64;
        if namespace.is_empty()
            || longest > MAX_STORE_KEY_LEN
            || namespace
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidNamespace(namespace));
        }
        Ok(Self(namespace))
    }

    /// Store key holding the cached entry.
    pub fn data_key(&self, key: &CacheKey) -> String {
        format!("{}:data:{}", self.0, key)
    }

    /// Store key holding the recompute lock.
    pub fn lock_key(&self, key: &CacheKey) -> String {
        format!("{}:lock:{}", self.0, key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for KeyNamespace {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}
