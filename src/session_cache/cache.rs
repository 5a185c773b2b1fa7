use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// Bounded map with expire-after-write eviction.
///
/// Entries live in `shards` independent LRU maps, so capacity is enforced per
/// shard. Expired entries are dropped lazily when touched. Mutating sequences
/// that must be atomic for one key take [`ExpiringCache::lock_key`].
pub struct ExpiringCache<K, V> {
    shards: Vec<Mutex<LruCache<K, Entry<V>>>>,
    key_locks: KeyLocks<K>,
    expire_after_write: Duration,
}

/// Keys currently held. An entry exists only while its guard is alive.
struct KeyLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

/// Exclusive hold on one cache key, released on drop.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard<'a, K: Hash + Eq> {
    locks: &'a KeyLocks<K>,
    key: K,
}

impl<K: Hash + Eq> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.key);
        self.locks.released.notify_all();
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_size: usize, expire_after_write: Duration, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new(max_size.div_ceil(shards)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            key_locks: KeyLocks {
                held: Mutex::new(HashSet::new()),
                released: Condvar::new(),
            },
            expire_after_write,
        }
    }

    fn hash_of(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn shard(&self, key: &K) -> &Mutex<LruCache<K, Entry<V>>> {
        &self.shards[Self::hash_of(key) % self.shards.len()]
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.written_at) >= self.expire_after_write
    }

    /// Serializes callers working on `key`; other keys proceed. Not
    /// reentrant.
    pub fn lock_key(&self, key: &K) -> KeyGuard<'_, K> {
        let mut held = self.key_locks.held.lock();
        while held.contains(key) {
            self.key_locks.released.wait(&mut held);
        }
        held.insert(key.clone());
        KeyGuard {
            locks: &self.key_locks,
            key: key.clone(),
        }
    }

    /// Keys with a live [`KeyGuard`].
    pub fn locked_keys(&self) -> usize {
        self.key_locks.held.lock().len()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut shard = self.shard(key).lock();
        let now = Instant::now();
        match shard.get(key) {
            Some(entry) if !self.is_expired(entry, now) => Some(entry.value.clone()),
            Some(_) => {
                shard.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.shard(&key).lock().put(
            key,
            Entry {
                value,
                written_at: Instant::now(),
            },
        );
    }

    /// Returns the cached value, or runs `load` and caches what it returns.
    /// A failed load caches nothing. Hold the key lock around this call when
    /// concurrent loaders of the same key must not both run.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = load()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        self.shard(key).lock().pop(key);
    }

    pub fn invalidate_all(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Live entries. Expired ones found on the way are evicted.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut live = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let expired: Vec<K> = shard
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                shard.pop(key);
            }
            live += shard.len();
        }
        live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
