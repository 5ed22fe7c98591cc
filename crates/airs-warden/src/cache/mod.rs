//! Process-Wide TTL Cache with Singleflight
//!
//! One get-or-compute abstraction shared by the JWKS cache, the HTTP
//! response cache and the OAuth2 token cache. At most one computation per
//! key is in flight at any time; concurrent callers for the same key await
//! the first computation's result instead of hitting the upstream again.

// Layer 1: Standard library imports
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::PipelineResult;

/// Default upper bound on cached entries per cache
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL cache with at-most-one concurrent computation per key
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    max_entries: usize,
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            max_entries,
        }
    }

    /// Get a live entry
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    /// Store a value for the given time to live
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_expired();
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop a cached entry
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Get a live entry or compute it, with singleflight semantics
    ///
    /// The computation returns the value together with the time to live to
    /// cache it for; `None` skips caching. A failed computation is not
    /// cached; the next caller computes again.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> PipelineResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<(V, Option<Duration>)>>,
    {
        if let Some(value) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(value);
        }

        let gate = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // a concurrent caller may have populated the entry while this task
        // waited for the gate
        if let Some(value) = self.get(key) {
            debug!(key, "cache hit after awaiting in-flight computation");
            return Ok(value);
        }

        let result = compute().await;
        self.inflight.remove(key);

        let (value, ttl) = result?;
        if let Some(ttl) = ttl {
            self.put(key, value.clone(), ttl);
        }

        Ok(value)
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
