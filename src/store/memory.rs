use super::CounterStore;
use crate::error::{ThrottleError, ThrottleResult};
use crate::rate_spec::MAX_WINDOW_SECONDS;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// In-process counter store.
///
/// A single mutex makes `compare_and_set` atomic. Only suitable when one
/// process enforces the limit; use [`super::RedisStore`] to share counters.
///
/// Expired entries are dropped when read and by [`MemoryStore::spawn_sweeper`]
/// for keys that are never read again.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl_seconds: u64) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds.min(MAX_WINDOW_SECONDS)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ThrottleResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| ThrottleError::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> ThrottleResult<usize> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let initial_count = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(initial_count - entries.len())
    }

    /// Purge expired entries every `period` on the tokio runtime. The task
    /// ends once every handle to the store has been dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let store = MemoryStore { entries };
                match store.purge_expired() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "purged expired counters"),
                    Err(_) => break,
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> ThrottleResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> ThrottleResult<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), Entry::new(value, ttl_seconds));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl_seconds: u64,
    ) -> ThrottleResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let current = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.as_str());

        if current != expected {
            return Ok(false);
        }

        entries.insert(key.to_string(), Entry::new(new, ttl_seconds));
        Ok(true)
    }

    async fn ping(&self) -> ThrottleResult<()> {
        self.lock().map(|_| ())
    }
}
