use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, RandomState};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SHARD_COUNT: usize = 16;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Sharded map with per-entry time-to-live.
///
/// Entries expire `ttl` after their last insert or `get_reset`; expired
/// entries are dropped lazily on access and eagerly by `purge_expired`.
/// Each shard is independently locked, so steady-state access from
/// per-queue workers is uncontended.
pub struct TimedCache<K, V> {
    shards: Vec<Mutex<HashMap<K, Entry<V>>>>,
    hasher: RandomState,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TimedCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
            ttl,
        }
    }

    fn shard(&self, key: &K) -> &Mutex<HashMap<K, Entry<V>>> {
        let idx = self.hasher.hash_one(key) as usize % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Insert or refresh an entry, resetting its TTL.
    pub fn add_or_update(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.shard(&key)
            .lock()
            .expect("cache shard lock poisoned")
            .insert(key, Entry { value, expires_at });
    }

    /// Fetch an entry and reset its TTL. Expired entries are removed and
    /// reported as absent.
    pub fn get_reset(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut shard = self.shard(key).lock().expect("cache shard lock poisoned");
        match shard.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.expires_at = now + self.ttl;
                Some(entry.value.clone())
            }
            Some(_) => {
                shard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard(key)
            .lock()
            .expect("cache shard lock poisoned")
            .remove(key)
            .map(|e| e.value)
    }

    /// Entries currently held, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("cache shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("cache shard lock poisoned");
            let before = shard.len();
            shard.retain(|_, entry| now < entry.expires_at);
            removed += before - shard.len();
        }
        removed
    }

    /// Keep only entries satisfying the predicate. Returns the number
    /// removed.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("cache shard lock poisoned");
            let before = shard.len();
            shard.retain(|k, entry| keep(k, &entry.value));
            removed += before - shard.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::from_secs(60));
        cache.add_or_update("a".to_string(), 1);
        assert_eq!(cache.get_reset(&"a".to_string()), Some(1));
        assert_eq!(cache.get_reset(&"b".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_replaces_value() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::from_secs(60));
        cache.add_or_update("a".to_string(), 1);
        cache.add_or_update("a".to_string(), 2);
        assert_eq!(cache.get_reset(&"a".to_string()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_returns_value() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::from_secs(60));
        cache.add_or_update("a".to_string(), 1);
        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert_eq!(cache.remove(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::ZERO);
        cache.add_or_update("a".to_string(), 1);
        assert_eq!(cache.get_reset(&"a".to_string()), None);
        // The expired entry was dropped on access.
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_expired_entries() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::ZERO);
        cache.add_or_update("a".to_string(), 1);
        cache.add_or_update("b".to_string(), 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_keeps_live_entries() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::from_secs(60));
        cache.add_or_update("a".to_string(), 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn retain_filters_by_value() {
        let cache: TimedCache<String, u32> = TimedCache::new(Duration::from_secs(60));
        for i in 0..10 {
            cache.add_or_update(format!("k{i}"), i);
        }
        let removed = cache.retain(|_, v| v % 2 == 0);
        assert_eq!(removed, 5);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get_reset(&"k4".to_string()), Some(4));
        assert_eq!(cache.get_reset(&"k5".to_string()), None);
    }
}
