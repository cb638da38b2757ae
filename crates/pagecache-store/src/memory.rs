//! In-process key-value store.
//!
//! Applies the same expiration rules as memcached, including the
//! relative/absolute interpretation of the numeric expiration value. Useful
//! for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagecache_core::{Clock, Error, Expiration, KvStore, Result, SystemClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Writes between sweeps of expired items.
const SWEEP_INTERVAL: usize = 1024;

#[derive(Debug, Clone)]
struct Item {
    value: Vec<u8>,
    deadline: Option<DateTime<Utc>>,
}

impl Item {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_none_or(|deadline| now < deadline)
    }
}

/// Process-local store with memcached expiration semantics.
pub struct MemoryStore {
    items: Mutex<HashMap<String, Item>>,
    writes: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            clock,
        }
    }

    /// Whether a live item exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.items()
            .map(|items| items.get(key).is_some_and(|item| item.is_live(now)))
            .unwrap_or(false)
    }

    /// Deadline of a live item. `Some(None)` means it never expires.
    pub fn deadline(&self, key: &str) -> Option<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let items = self.items().ok()?;
        items
            .get(key)
            .filter(|item| item.is_live(now))
            .map(|item| item.deadline)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.items()
            .map(|items| items.values().filter(|item| item.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired item, returning how many were removed.
    ///
    /// Runs on its own every few writes; items nobody reads again would
    /// otherwise stay in memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.items()
            .map(|mut items| Self::sweep(&mut items, now))
            .unwrap_or(0)
    }

    fn sweep(items: &mut HashMap<String, Item>, now: DateTime<Utc>) -> usize {
        let before = items.len();
        items.retain(|_, item| item.is_live(now));
        let removed = before - items.len();
        if removed > 0 {
            debug!(removed, remaining = items.len(), "Swept expired items");
        }
        removed
    }

    fn insert(
        &self,
        items: &mut HashMap<String, Item>,
        key: &str,
        item: Item,
        now: DateTime<Utc>,
    ) {
        items.insert(key.to_string(), item);
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            Self::sweep(items, now);
        }
    }

    fn items(&self) -> Result<MutexGuard<'_, HashMap<String, Item>>> {
        self.items
            .lock()
            .map_err(|_| Error::Store("memory store poisoned".to_string()))
    }

    fn item(&self, value: &[u8], expiration: Expiration, now: DateTime<Utc>) -> Item {
        let wire = expiration.to_wire(now);
        Item {
            value: value.to_vec(),
            deadline: Expiration::from_wire(wire, now),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut items = self.items()?;
        match items.get(key) {
            Some(item) if item.is_live(now) => Ok(Some(item.value.clone())),
            Some(_) => {
                items.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn add(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<bool> {
        let now = self.clock.now();
        let mut items = self.items()?;
        if items.get(key).is_some_and(|item| item.is_live(now)) {
            return Ok(false);
        }
        let item = self.item(value, expiration, now);
        self.insert(&mut items, key, item, now);
        Ok(true)
    }

    async fn set(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<()> {
        let now = self.clock.now();
        let item = self.item(value, expiration, now);
        let mut items = self.items()?;
        self.insert(&mut items, key, item, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.items()?.remove(key);
        Ok(())
    }
}
