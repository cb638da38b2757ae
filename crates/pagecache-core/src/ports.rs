//! Port traits.
//!
//! The key-value store is the only shared state between request handlers.
//! Handlers may live in different processes or on different machines, so
//! every coordination step goes through these operations.

use crate::Result;
use crate::expiration::Expiration;
use async_trait::async_trait;

/// Shared key-value store used as cache backend and lock service.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically create `key` if it does not exist.
    ///
    /// Returns `true` only when this call created the key.
    async fn add(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<bool>;

    /// Unconditionally store a value.
    async fn set(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<()>;

    /// Remove a key. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
