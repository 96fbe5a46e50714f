//! File and command output cache.
//!
//! The cache is shared by every unit of one invocation so that expensive
//! reads (a large log file, `cvpi status all`) happen once. Locking is
//! advisory: a writer takes the key's lock before computing the value and
//! releases it after `put`, and anyone else asking for the lock waits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bugcheck_core::CommandResult;

/// Cache key: a file path or literal command, plus an optional grep filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// File path or command string
    pub name: String,
    /// Filter the cached lines were produced with
    pub filter: Option<String>,
}

impl CacheKey {
    /// Key for unfiltered contents
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
        }
    }

    /// Key for contents produced with `filter`
    pub fn filtered(name: impl Into<String>, filter: Option<&str>) -> Self {
        Self {
            name: name.into(),
            filter: filter.map(str::to_string),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{} [{filter}]", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A cached value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    /// File contents
    Lines(Vec<String>),
    /// Command result
    Command(CommandResult),
}

/// Key-value cache with advisory per-key locks
#[async_trait]
pub trait FileCache: fmt::Debug + Send + Sync {
    /// Cached value for `key`, `None` on miss
    async fn get(&self, key: &CacheKey) -> Option<CachedValue>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: CacheKey, value: CachedValue);

    /// Take the advisory lock for `key`, waiting for the current holder
    async fn lock(&self, key: &CacheKey);

    /// Release the advisory lock for `key`. Releasing a key that is not
    /// locked does nothing.
    async fn unlock(&self, key: &CacheKey);
}

/// In-process [`FileCache`]
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, CachedValue>>,
    gates: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    held: Mutex<HashMap<CacheKey, OwnedMutexGuard<()>>>,
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    async fn gate_count(&self) -> usize {
        self.gates.lock().await.len()
    }

    /// Returns true if nothing has been cached yet
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl FileCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn put(&self, key: CacheKey, value: CachedValue) {
        self.entries.lock().await.insert(key, value);
    }

    async fn lock(&self, key: &CacheKey) {
        let gate = {
            let mut gates = self.gates.lock().await;
            Arc::clone(gates.entry(key.clone()).or_default())
        };
        let guard = gate.lock_owned().await;
        self.held.lock().await.insert(key.clone(), guard);
    }

    async fn unlock(&self, key: &CacheKey) {
        let released = self.held.lock().await.remove(key);
        drop(released);

        let mut gates = self.gates.lock().await;
        if gates.get(key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn filtered_and_unfiltered_entries_are_distinct() {
        let cache = MemoryCache::new();
        let raw = CacheKey::new("/var/log/messages");
        let grepped = CacheKey::filtered("/var/log/messages", Some("ERROR"));

        cache
            .put(raw.clone(), CachedValue::Lines(vec!["a".into(), "ERROR b".into()]))
            .await;
        assert!(cache.get(&grepped).await.is_none());

        cache
            .put(grepped.clone(), CachedValue::Lines(vec!["ERROR b".into()]))
            .await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(
            cache.get(&grepped).await,
            Some(CachedValue::Lines(vec!["ERROR b".into()]))
        );
    }

    #[tokio::test]
    async fn unlock_without_lock_is_noop() {
        let cache = MemoryCache::new();
        cache.unlock(&CacheKey::new("cvpi status all")).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn lock_waits_for_holder() {
        let cache = Arc::new(MemoryCache::new());
        let key = CacheKey::new("cvpi status all");

        cache.lock(&key).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                cache.lock(&key).await;
                let seen = cache.get(&key).await;
                cache.unlock(&key).await;
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        cache
            .put(key.clone(), CachedValue::Lines(vec!["done".into()]))
            .await;
        cache.unlock(&key).await;

        let seen = waiter.await.unwrap();
        assert_eq!(seen, Some(CachedValue::Lines(vec!["done".into()])));
        assert_eq!(cache.gate_count().await, 0);
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let cache = MemoryCache::new();
        for i in 0..10 {
            let key = CacheKey::new(format!("cat /var/log/{i}.log"));
            cache.lock(&key).await;
            assert_eq!(cache.gate_count().await, 1);
            cache.unlock(&key).await;
        }
        assert_eq!(cache.gate_count().await, 0);
    }
}
