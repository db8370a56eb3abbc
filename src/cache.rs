//! Bounded TTL map
//!
//! Backs the bearer-token cache and the Hub search cache. Entries carry a
//! per-entry expiry; eviction at capacity purges expired entries first and
//! then falls back to FIFO over insertion order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner<V> {
    map: HashMap<String, Entry<V>>,
    // Insertion order; one element per live key.
    order: VecDeque<String>,
}

/// A thread-safe key→value store with bounded size and per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<V> {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity,
            default_ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Look up a key. Expired entries are deleted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired = match inner.map.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
        }
        None
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL.
    ///
    /// At capacity, expired entries are purged first; if the cache is still
    /// full, the earliest-inserted entry is evicted.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.lock().unwrap();

        if inner.map.contains_key(&key) {
            inner.map.insert(
                key,
                Entry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            return;
        }

        if inner.map.len() >= self.capacity {
            let now = Instant::now();
            let expired: Vec<String> = inner
                .map
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                inner.map.remove(k);
            }
            inner.order.retain(|k| !expired.contains(k));

            while inner.map.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        inner.map.insert(
            key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.order.push_back(key);
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.remove(key);
        inner.order.retain(|k| k != key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlCache<String> {
        TtlCache::new(capacity, Duration::from_secs(60))
    }

    // Test 1: Miss on unknown key
    #[test]
    fn test_get_miss() {
        let c = cache(10);
        assert_eq!(c.get("nope"), None);
    }

    // Test 2: Set then get round-trips
    #[test]
    fn test_set_get() {
        let c = cache(10);
        c.set("a", "1".to_string());
        assert_eq!(c.get("a"), Some("1".to_string()));
        assert_eq!(c.len(), 1);
    }

    // Test 3: Expired entry is a miss and is deleted
    #[test]
    fn test_expiry_on_get() {
        let c = cache(10);
        c.set_with_ttl("a", "1".to_string(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(c.get("a"), None);
        assert_eq!(c.len(), 0);
    }

    // Test 4: FIFO eviction at capacity
    #[test]
    fn test_fifo_eviction() {
        let c = cache(3);
        c.set("a", "1".to_string());
        c.set("b", "2".to_string());
        c.set("c", "3".to_string());
        c.set("d", "4".to_string());

        assert_eq!(c.len(), 3);
        assert_eq!(c.get("a"), None); // earliest insertion evicted
        assert_eq!(c.get("b"), Some("2".to_string()));
        assert_eq!(c.get("d"), Some("4".to_string()));
    }

    // Test 5: Expired entries are purged before FIFO eviction
    #[test]
    fn test_purge_expired_before_evict() {
        let c = cache(3);
        c.set("a", "1".to_string());
        c.set_with_ttl("b", "2".to_string(), Duration::from_millis(1));
        c.set("c", "3".to_string());
        std::thread::sleep(Duration::from_millis(5));

        c.set("d", "4".to_string());

        // "b" was expired and purged; "a" survives.
        assert_eq!(c.get("a"), Some("1".to_string()));
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("d"), Some("4".to_string()));
    }

    // Test 6: Size never exceeds capacity after set
    #[test]
    fn test_capacity_invariant() {
        let c = cache(5);
        for i in 0..50 {
            c.set(format!("k{i}"), "v".to_string());
            assert!(c.len() <= 5);
        }
    }

    // Test 7: Re-setting an existing key updates in place
    #[test]
    fn test_reset_existing_key() {
        let c = cache(2);
        c.set("a", "1".to_string());
        c.set("b", "2".to_string());
        c.set("a", "updated".to_string());

        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a"), Some("updated".to_string()));

        // "a" keeps its original insertion slot, so it is still evicted first.
        c.set("c", "3".to_string());
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some("2".to_string()));
    }

    // Test 8: Remove and clear
    #[test]
    fn test_remove_and_clear() {
        let c = cache(10);
        c.set("a", "1".to_string());
        c.set("b", "2".to_string());

        c.remove("a");
        assert_eq!(c.get("a"), None);
        assert_eq!(c.len(), 1);

        c.clear();
        assert!(c.is_empty());
    }
}
