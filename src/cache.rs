use crate::key::ByteKey;
use crate::Result;
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Recency bookkeeping of the cache. Every hit or insert stamps the block with a fresh
/// tick, the block holding the smallest tick is the least recently used one.
#[derive(Debug)]
struct Lru {
    map: AHashMap<ByteKey, (Bytes, u64)>,
    order: BTreeMap<u64, ByteKey>,
    tick: u64,
    cap: usize,
}

impl Lru {
    fn new(cap: usize) -> Self {
        Self {
            map: AHashMap::with_capacity(cap),
            order: BTreeMap::new(),
            tick: 0,
            cap,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, key: &ByteKey) -> Option<Bytes> {
        let tick = self.next_tick();
        let (region, stamp) = self.map.get_mut(key)?;

        self.order.remove(&*stamp);
        *stamp = tick;
        self.order.insert(tick, key.clone());

        Some(region.clone())
    }

    fn insert(&mut self, key: ByteKey, region: Bytes) {
        if self.cap == 0 {
            return;
        }

        let tick = self.next_tick();
        if let Some((_, stamp)) = self.map.insert(key.clone(), (region, tick)) {
            self.order.remove(&stamp);
        }
        self.order.insert(tick, key);

        while self.map.len() > self.cap {
            match self.order.pop_first() {
                Some((_, evicted)) => {
                    tracing::trace!("evicting block {:?}", evicted);
                    self.map.remove(&evicted);
                }
                None => break,
            }
        }
    }
}

/// Bounded map of block regions keyed by the first key of a block. Each reader owns one
/// and shares it between all threads calling into that reader. A single mutex serializes
/// lookups and inserts so a block is never mapped twice and the LRU order stays exact.
#[derive(Debug)]
pub struct BlockCache {
    inner: Mutex<Lru>,
}

impl BlockCache {
    /// Capacity of 0 turns caching off, every lookup maps the block again.
    pub fn new(cap: usize) -> Self {
        if cap > 0 {
            tracing::debug!("caching up to {} blocks", cap);
        }

        Self {
            inner: Mutex::new(Lru::new(cap)),
        }
    }

    /// Cache holding every given block. Its capacity equals the number of blocks so
    /// nothing ever gets evicted.
    pub fn pinned(blocks: Vec<(ByteKey, Bytes)>) -> Self {
        let mut lru = Lru::new(blocks.len());
        for (key, region) in blocks {
            lru.insert(key, region);
        }

        Self {
            inner: Mutex::new(lru),
        }
    }

    /// Returns the cached region or loads and caches it. Loading happens under the lock.
    pub fn get_or_load<F>(&self, key: &ByteKey, load: F) -> Result<Bytes>
    where
        F: FnOnce() -> Result<Bytes>,
    {
        let mut lru = self.inner.lock();
        if let Some(region) = lru.get(key) {
            return Ok(region);
        }

        let region = load()?;
        lru.insert(key.clone(), region.clone());

        Ok(region)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap
    }

    #[cfg(test)]
    fn contains(&self, key: &ByteKey) -> bool {
        self.inner.lock().map.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(raw: &'static [u8]) -> ByteKey {
        ByteKey::from(raw)
    }

    fn load(value: &'static str) -> impl FnOnce() -> Result<Bytes> {
        move || Ok(Bytes::from(value))
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = BlockCache::new(2);
        assert_eq!(cache.get_or_load(&key(b"a"), load("1")).unwrap(), "1");
        // Loader is not called on a hit.
        assert_eq!(cache.get_or_load(&key(b"a"), load("x")).unwrap(), "1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = BlockCache::new(2);
        cache.get_or_load(&key(b"a"), load("1")).unwrap();
        cache.get_or_load(&key(b"b"), load("2")).unwrap();

        // Touch "a" so that "b" becomes the oldest.
        cache.get_or_load(&key(b"a"), load("x")).unwrap();
        cache.get_or_load(&key(b"c"), load("3")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key(b"a")));
        assert!(!cache.contains(&key(b"b")));
        assert!(cache.contains(&key(b"c")));

        cache.get_or_load(&key(b"d"), load("4")).unwrap();
        assert!(!cache.contains(&key(b"a")));
        assert!(cache.contains(&key(b"c")));
        assert!(cache.contains(&key(b"d")));
    }

    #[test]
    fn test_zero_capacity() {
        let cache = BlockCache::new(0);
        assert_eq!(cache.get_or_load(&key(b"a"), load("1")).unwrap(), "1");
        assert_eq!(cache.get_or_load(&key(b"a"), load("2")).unwrap(), "2");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_load_error_is_not_cached() {
        let cache = BlockCache::new(1);
        let res = cache.get_or_load(&key(b"a"), || Err(Error::format("boom")));
        assert!(res.is_err());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_or_load(&key(b"a"), load("1")).unwrap(), "1");
    }

    #[test]
    fn test_pinned() {
        let blocks = (0..10u8)
            .map(|i| (ByteKey::from(vec![i]), Bytes::from(vec![i; 4])))
            .collect();
        let cache = BlockCache::pinned(blocks);
        assert_eq!(cache.capacity(), 10);
        assert_eq!(cache.len(), 10);

        for i in 0..10u8 {
            let region = cache
                .get_or_load(&ByteKey::from(vec![i]), || Err(Error::format("not pinned")))
                .unwrap();
            assert_eq!(region, Bytes::from(vec![i; 4]));
        }
    }

    #[test]
    fn test_concurrent_loads_map_once() {
        let cache = Arc::new(BlockCache::new(1));
        let loads = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..16 {
                let cache = cache.clone();
                let loads = loads.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        let region = cache
                            .get_or_load(&key(b"a"), || {
                                loads.fetch_add(1, Ordering::SeqCst);
                                Ok(Bytes::from("1"))
                            })
                            .unwrap();
                        assert_eq!(region, "1");
                    }
                });
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
