use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Thread-safe TTL + LRU cache.
///
/// Shared by the gateway response cache and the orchestrator's verdict
/// cache, both of which run at capacities around 1000 entries. Eviction
/// does a linear scan for the least-recently-used entry — at these sizes
/// that is cheaper than maintaining an intrusive list.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

struct Inner<V> {
    map: HashMap<String, Entry<V>>,
    /// Monotonic use counter; higher = more recently used.
    tick: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    last_used: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
            }),
            ttl,
            capacity,
        }
    }

    /// Fetch a live entry, bumping its recency. Expired entries are removed
    /// on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.map.get_mut(key) {
            if entry.inserted.elapsed() < self.ttl {
                entry.last_used = tick;
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        inner.map.remove(key);
        None
    }

    /// Insert or replace, evicting the least-recently-used live entry when
    /// at capacity.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.map.contains_key(&key) && inner.map.len() >= self.capacity {
            // Prefer dropping something already expired.
            let expired: Option<String> = inner
                .map
                .iter()
                .find(|(_, e)| e.inserted.elapsed() >= self.ttl)
                .map(|(k, _)| k.clone());
            let victim = expired.or_else(|| {
                inner
                    .map
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
            });
            if let Some(k) = victim {
                inner.map.remove(&k);
            }
        }

        inner.map.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry past its TTL.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.lock().unwrap();
        let ttl = self.ttl;
        inner.map.retain(|_, e| e.inserted.elapsed() < ttl);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let cache: TtlCache<u32> = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_are_gone() {
        let cache: TtlCache<u32> = TtlCache::new(4, Duration::from_millis(10));
        cache.insert("a", 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_keeps_recently_used() {
        let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touch "a" so "b" becomes the LRU victim
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn purge_expired_retains_live_entries() {
        let cache: TtlCache<u32> = TtlCache::new(8, Duration::from_millis(30));
        cache.insert("old", 1);
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("new", 2);
        cache.purge_expired();
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("new"), Some(2));
    }
}
