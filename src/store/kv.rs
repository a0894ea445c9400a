//! Key-value cache abstraction backing the record store.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::StoreError;

/// Point get/put against a shared TTL cache (Workers KV, memcache, ...).
///
/// No compare-and-swap: concurrent read-modify-write on one key may lose
/// updates.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait KvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring `ttl_secs` from now.
    async fn put(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError>;
}

struct Entry {
    value: String,
    expires_at_ms: i64,
}

/// Process-local cache used by the native server and tests.
pub struct MemoryKv<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

impl Default for MemoryKv<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> MemoryKv<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (unexpired) keys.
    #[cfg(test)]
    fn len(&self) -> Result<usize, StoreError> {
        let now_ms = self.clock.now_ms();
        let entries = self.lock()?;
        Ok(entries.values().filter(|e| e.expires_at_ms > now_ms).count())
    }

    #[cfg(test)]
    fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|n| n == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory cache lock poisoned".to_string()))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<C: Clock + Send + Sync> KvCache for MemoryKv<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(key, "cache entry expired");
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), StoreError> {
        let now_ms = self.clock.now_ms();
        let expires_at_ms = now_ms.saturating_add((ttl_secs as i64).saturating_mul(1000));
        let mut entries = self.lock()?;
        entries.retain(|_, e| e.expires_at_ms > now_ms);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }
}

/// Cache whose writes always fail; reads see whatever `inner` holds.
#[cfg(test)]
pub(crate) struct ReadOnlyKv<C: Clock> {
    pub inner: MemoryKv<C>,
}

#[cfg(test)]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<C: Clock + Send + Sync> KvCache for ReadOnlyKv<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, _key: &str, _value: String, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("cache is read-only".to_string()))
    }
}
