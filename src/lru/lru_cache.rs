use std::borrow::Borrow;
use std::hash::Hash;

use linked_hash_map::LinkedHashMap;

/// Provides a capacity constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is room left. Once the max number of
/// entries is reached, old (least recently used) entries will be evicted - hence the name LRU
/// cache.
///
/// Both, reading an entry via **get** and writing it via **put** mark an entry as most recently
/// used. Checking for an entry via **contains** doesn't.
///
/// # Examples
/// ```
/// # use placecache::lru::LRUCache;
/// // Specifies a cache which can store up to 2 entries...
/// let mut lru = LRUCache::new(2);
///
/// lru.put("A".to_owned(), 1);
/// lru.put("B".to_owned(), 2);
/// assert_eq!(lru.get("A"), Some(&1));
///
/// // "B" is now the least recently used entry and will be evicted to make room...
/// lru.put("C".to_owned(), 3);
/// assert_eq!(lru.contains("A"), true);
/// assert_eq!(lru.contains("B"), false);
/// assert_eq!(lru.contains("C"), true);
///```
pub struct LRUCache<K: Hash + Eq, V> {
    capacity: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    map: LinkedHashMap<K, V>,
}

impl<K: Hash + Eq, V> LRUCache<K, V> {
    /// Creates a new cache which can store up to **capacity** entries.
    ///
    /// # Examples
    /// ```
    /// # use placecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(128);
    ///
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
    ///```
    pub fn new(capacity: usize) -> Self {
        LRUCache {
            capacity,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            map: LinkedHashMap::with_capacity(capacity),
        }
    }

    /// Stores the given value for the given key.
    ///
    /// If a value is already present, it is replaced. In any case, the entry becomes the most
    /// recently used one. If the cache grows beyond its capacity, the least recently used
    /// entries are evicted.
    pub fn put(&mut self, key: K, value: V) {
        let _ = self.map.insert(key, value);
        self.writes += 1;

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.map.len() > self.capacity {
            match self.map.pop_front() {
                Some(_) => self.evictions += 1,
                None => unreachable!("Failed to enforce constraints of a LRU cache!"),
            }
        }

        debug_assert!(self.map.len() <= self.capacity);
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A hit marks the entry as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(value) => {
                self.hits += 1;
                Some(&*value)
            }
            None => None,
        }
    }

    /// Determines if a value is present for the given key.
    ///
    /// In contrast to **get** this neither changes the order of eviction nor the metrics.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Removes the entry for the given key and returns its value if present.
    ///
    /// # Examples
    /// ```
    /// # use placecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(128);
    ///
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.remove("Foo"), Some("Bar".to_owned()));
    /// assert_eq!(lru.get("Foo"), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.writes += 1;
        self.map.remove(key)
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits, evictions).
    pub fn flush(&mut self) {
        self.map.clear();
        self.reads = 0;
        self.hits = 0;
        self.writes = 0;
        self.evictions = 0;
    }

    /// Returns the number of elements in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all keys, starting with the least recently used one.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Returns to overall capacity (max number of entries) of this cache.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the maximal number of entries permitted in this cache.
    ///
    /// If the capacity shrinks, surplus entries are evicted immediately.
    ///
    /// # Examples
    /// ```
    /// # use placecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(10);
    /// for key in ["A", "B", "C", "D", "E", "F"] {
    ///     lru.put(key.to_owned(), key.to_owned());
    /// }
    /// assert_eq!(lru.len(), 6);
    ///
    /// // Now request that the cache is reduced to only 3 entries...
    /// lru.set_capacity(3);
    /// assert_eq!(lru.capacity(), 3);
    ///
    /// // ..which only keeps the three most recently used ones.
    /// assert_eq!(lru.keys().cloned().collect::<Vec<_>>(), vec!["D", "E", "F"]);
    /// ```
    pub fn set_capacity(&mut self, capacity: usize) {
        let previous_capacity = self.capacity;
        self.capacity = capacity;
        if previous_capacity > self.capacity {
            self.enforce_constraints();
        }
    }

    /// Returns the cache utilization in percent.
    pub fn utilization(&self) -> f32 {
        match self.capacity {
            0 => 0.,
            n => self.map.len() as f32 / n as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the write read ration in percent.
    ///
    /// This simply computes how many of the operations were writes. A healthy cache has way more
    /// reads than writes.
    pub fn write_read_ratio(&self) -> f32 {
        match self.reads {
            0 => 100.,
            n => self.writes as f32 / (self.writes + n) as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries which have been evicted to enforce the capacity.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}
