//! Short-TTL in-memory map of resolved responses.
//!
//! Expiry is checked lazily on every read and eagerly by `sweep_expired`.
//! An entry with `now - inserted_at >= ttl` is a miss even if still present.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub city: String,
    pub vegetable: String,
    pub qualifier: Option<String>,
}

impl CacheKey {
    pub fn new(city: &str, vegetable: &str) -> Self {
        Self {
            city: city.trim().to_lowercase(),
            vegetable: vegetable.trim().to_lowercase(),
            qualifier: None,
        }
    }

    #[cfg(test)]
    pub fn with_qualifier(mut self, qualifier: &str) -> Self {
        let q = qualifier.trim().to_lowercase();
        self.qualifier = if q.is_empty() { None } else { Some(q) };
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.city, self.vegetable)?;
        if let Some(q) = &self.qualifier {
            write!(f, ":{}", q)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
}

/// Concurrent TTL cache. Each shard of the map is guarded by its own lock,
/// so a read-check-remove never races a `set` on the same key.
pub struct FreshnessCache<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
    default_ttl: Duration,
}

impl<V: Clone> FreshnessCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self { entries: DashMap::new(), default_ttl }
    }

    #[cfg(test)]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                debug!("Cache HIT: {}", key);
                return Some(entry.value.clone());
            }
        }
        // Only drop it if it is still the expired entry we saw.
        if self.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            debug!("Cache EXPIRED: {}", key);
        } else {
            debug!("Cache MISS: {}", key);
        }
        None
    }

    pub fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        debug!("Cache SET: {} (ttl {:?})", key, ttl);
        self.entries.insert(key, CacheEntry { value, inserted_at: Instant::now(), ttl });
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Physically remove every expired entry; returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Cache sweep removed {} expired entries", removed);
        }
        removed
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut stats = CacheStats::default();
        for entry in self.entries.iter() {
            stats.total_entries += 1;
            if entry.is_expired(now) {
                stats.expired_entries += 1;
            } else {
                stats.active_entries += 1;
            }
        }
        stats
    }
}
