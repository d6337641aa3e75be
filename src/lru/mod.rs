//! Provides a capacity constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry if it is about to grow beyond its capacity.
//! Every successful read as well as every write moves an entry to the "recent" end of the
//! internal order, evictions always happen at the "old" end.
//!
//! This is the bookkeeping part of the [PlaceCache](crate::places::cache::PlaceCache), which
//! adds request coalescing on top of it. The cache itself is generic and can store any kind of
//! keys and values.
mod lru_cache;

pub use lru_cache::LRUCache;
