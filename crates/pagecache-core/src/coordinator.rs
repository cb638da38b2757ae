//! Cache coordination.
//!
//! Decides per request whether a stored response is served or the origin is
//! invoked, and makes sure that for a stale entry only one handler across all
//! processes recomputes it. Mutual exclusion comes solely from the store's
//! atomic `add`; there is no in-process lock.

use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, LOCK_SENTINEL, ResponseRecord};
use crate::expiration::Expiration;
use crate::key::{CacheKey, KeyNamespace};
use crate::ports::KvStore;
use crate::rule::{CacheRule, RuleSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// What becomes of an origin response once it has been returned.
#[derive(Debug)]
pub enum Capture {
    /// Store the record and release the lock.
    Store(ResponseRecord),
    /// A good response that cannot be stored. The lock is still released.
    Skip,
    /// An origin failure. Nothing is stored and the lock is left to expire.
    Failed,
}

/// A response produced by the origin that may be stored.
pub trait OriginResponse {
    fn capture(&self) -> Capture;
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Fresh entry served from the store.
    Hit,
    /// Expired entry served while another handler recomputes it.
    Stale,
    /// Nothing stored; the origin was invoked.
    Miss,
    /// Expired entry; this handler took the lock and invoked the origin.
    Revalidated,
    /// No rule matched; the store was not consulted.
    Bypass,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Stale => write!(f, "STALE"),
            Self::Miss => write!(f, "MISS"),
            Self::Revalidated => write!(f, "REVALIDATED"),
            Self::Bypass => write!(f, "BYPASS"),
        }
    }
}

/// Outcome of [`Coordinator::fetch`].
#[derive(Debug)]
pub enum Lookup<R> {
    /// The stored response, still fresh.
    Fresh(ResponseRecord),
    /// The stored response, expired but inside its grace window.
    Stale(ResponseRecord),
    /// The origin's response, returned as produced (session headers intact).
    Computed {
        response: R,
        status: CacheStatus,
        stored: bool,
    },
}

impl<R> Lookup<R> {
    pub fn status(&self) -> CacheStatus {
        match self {
            Lookup::Fresh(_) => CacheStatus::Hit,
            Lookup::Stale(_) => CacheStatus::Stale,
            Lookup::Computed { status, .. } => *status,
        }
    }
}

/// Runs the caching decision protocol against a shared store.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    rules: RuleSet,
    namespace: KeyNamespace,
}

impl Coordinator {
    pub fn new(store: Arc<dyn KvStore>, rules: RuleSet) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            rules,
            namespace: KeyNamespace::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_namespace(mut self, namespace: KeyNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// First rule matching the path and query string.
    pub fn match_rule(&self, path_and_query: &str) -> Option<&CacheRule> {
        self.rules.match_path(path_and_query)
    }

    /// Serve `key` from the store or recompute it with `origin`.
    ///
    /// Origin errors are returned unchanged. Store failures never surface:
    /// reads degrade to a miss and writes are best effort.
    pub async fn fetch<F, Fut, R, E>(
        &self,
        rule: &CacheRule,
        key: &CacheKey,
        origin: F,
    ) -> Result<Lookup<R>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: OriginResponse,
    {
        let data_key = self.namespace.data_key(key);
        let lock_key = self.namespace.lock_key(key);

        let mut status = CacheStatus::Miss;
        let mut lock_held = false;

        if let Some(entry) = self.read_entry(&data_key).await {
            if entry.is_fresh(self.clock.now()) {
                debug!(key = %key, prefix = %rule.url_prefix, "Serving fresh entry");
                return Ok(Lookup::Fresh(entry.response));
            }

            // The lock disappears at the end of this expiry cycle's grace
            // window, however early it is taken.
            let lock_deadline = entry.expires_at + rule.grace();
            match self
                .store
                .add(&lock_key, LOCK_SENTINEL, Expiration::at(lock_deadline))
                .await
            {
                Ok(true) => {
                    debug!(key = %key, %lock_deadline, "Acquired recompute lock");
                    lock_held = true;
                    status = CacheStatus::Revalidated;
                }
                Ok(false) => {
                    debug!(key = %key, "Recompute in progress elsewhere, serving stale entry");
                    return Ok(Lookup::Stale(entry.response));
                }
                Err(e) => {
                    warn!(key = %key, store = self.store.name(), error = %e, "Failed to take recompute lock, serving stale entry");
                    return Ok(Lookup::Stale(entry.response));
                }
            }
        }

        // On error the lock, if held, is left to expire at its deadline.
        let response = origin().await?;

        let stored = match response.capture() {
            Capture::Store(record) => self.write_entry(rule, key, &data_key, record).await,
            Capture::Skip => {
                debug!(key = %key, "Response not storable, passing it through");
                false
            }
            Capture::Failed => {
                warn!(key = %key, lock_held, "Origin failed, response not stored");
                return Ok(Lookup::Computed {
                    response,
                    status,
                    stored: false,
                });
            }
        };

        if lock_held {
            if let Err(e) = self.store.delete(&lock_key).await {
                warn!(key = %key, store = self.store.name(), error = %e, "Failed to release recompute lock");
            }
        }

        Ok(Lookup::Computed {
            response,
            status,
            stored,
        })
    }

    async fn read_entry(&self, data_key: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(data_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = data_key, store = self.store.name(), error = %e, "Store read failed, treating as miss");
                return None;
            }
        };

        match CacheEntry::decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = data_key, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }

    async fn write_entry(
        &self,
        rule: &CacheRule,
        key: &CacheKey,
        data_key: &str,
        mut record: ResponseRecord,
    ) -> bool {
        record.strip_session_headers();

        let entry = CacheEntry::new(self.clock.now() + rule.ttl(), record);
        let bytes = match entry.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return false;
            }
        };

        let expiration = Expiration::after_seconds(rule.storage_seconds());
        match self.store.set(data_key, &bytes, expiration).await {
            Ok(()) => {
                debug!(key = %key, expires_at = %entry.expires_at, size = bytes.len(), "Stored cache entry");
                true
            }
            Err(e) => {
                warn!(key = %key, store = self.store.name(), error = %e, "Failed to store cache entry");
                false
            }
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("store", &self.store.name())
            .field("rules", &self.rules)
            .field("namespace", &self.namespace)
            .finish()
    }
}
