//! Pagecache Core
//!
//! Domain types, traits and the cache coordination protocol for pagecache.
//! This crate has no HTTP or network dependencies; it defines the shared
//! vocabulary used by the store adapters, the tower layer and the proxy.

pub mod clock;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod expiration;
pub mod key;
pub mod ports;
pub mod rule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CacheStatus, Capture, Coordinator, Lookup, OriginResponse};
pub use entry::{CacheEntry, LOCK_SENTINEL, ResponseRecord, SESSION_HEADERS, StoredHeader};
pub use error::{Error, Result};
pub use expiration::{Expiration, RELATIVE_EXPIRATION_LIMIT};
pub use key::{CacheKey, KeyNamespace};
pub use ports::KvStore;
pub use rule::{CacheRule, RuleSet};
