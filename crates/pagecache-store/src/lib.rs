//! Key-value store adapters for pagecache.

pub mod config;
pub mod memcached;
pub mod memory;

pub use config::MemcachedConfig;
pub use memcached::MemcachedStore;
pub use memory::MemoryStore;
