//! In-memory LRU cache backend, bounded by total payload bytes rather than
//! entry count.
//!
//! A fixed-entry-count cache (a plain `Mutex<LruCache<..>>` from the `lru`
//! crate, bounding something like `COMMIT_CACHE_CAPACITY`/
//! `TREE_CACHE_CAPACITY` by count) doesn't fit objects whose sizes vary by
//! orders of magnitude. This generalizes to byte-size bounding using
//! [`clru::CLruCache`] with a custom [`WeightScale`], which `lru` does not
//! support — the concrete reason `clru` replaces `lru` in the dependency
//! stack (see DESIGN.md).

use std::num::NonZeroUsize;
use std::sync::Mutex;

use clru::CLruCache;
use clru::CLruCacheConfig;
use clru::WeightScale;

use crate::backend::Backend;
use crate::backend::BackendMeta;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::object::Buffer;

pub const DEFAULT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;

/// Per-entry overhead charged against the byte budget, covering the id and
/// bookkeeping clru itself keeps; keeps a cache of many tiny objects from
/// reporting as "free".
const ENTRY_OVERHEAD: usize = 64;

type Entry = (DataType, Buffer);

struct ByteScale;

impl WeightScale<HashId, Entry> for ByteScale {
    fn weight(&self, _key: &HashId, value: &Entry) -> usize {
        value.1.len() + ENTRY_OVERHEAD
    }
}

/// Thread-safe LRU cache keyed by id, weighted by payload size.
///
/// On `put`: insert at the MRU end, then evict from the LRU end until the
/// total weight is back under capacity (handled internally by
/// `CLruCache::put_with_weight`). On `load` hit: splice the entry to the MRU
/// end. A single mutex guards both the map and the LRU list; eviction drops
/// the evicted buffer outside of any other lock, so a slow `Drop` never
/// blocks a concurrent reader.
pub struct MemoryCache {
    inner: Mutex<CLruCache<HashId, Entry, std::collections::hash_map::RandomState, ByteScale>>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache").field("len", &self.len()).finish()
    }
}

impl MemoryCache {
    pub fn new(capacity_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(capacity_bytes.max(1)).unwrap();
        let config = CLruCacheConfig::new(cap).with_scale(ByteScale);
        MemoryCache {
            inner: Mutex::new(CLruCache::with_config(config)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn weight(&self) -> usize {
        self.inner.lock().unwrap().weight()
    }

    pub fn get(&self, id: HashId) -> Option<(DataType, Buffer)> {
        let mut guard = self.inner.lock().unwrap();
        guard.get(&id).cloned()
    }

    pub fn insert(&self, id: HashId, ty: DataType, content: Buffer) {
        let mut guard = self.inner.lock().unwrap();
        // `put_with_weight` evicts internally; the Err case only fires when
        // a single entry's weight exceeds the whole cache's capacity, which
        // we treat as "not worth caching" rather than an error.
        let _ = guard.put_with_weight(id, (ty, content));
    }

    pub fn remove(&self, id: HashId) {
        self.inner.lock().unwrap().pop(&id);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl Backend for MemoryCache {
    fn name(&self) -> &str {
        "memory-cache"
    }

    fn get_meta(&self, id: HashId) -> StoreResult<Option<BackendMeta>> {
        Ok(self
            .get(id)
            .map(|(ty, buf)| DataHeader::new(ty, buf.len() as u64))
            .transpose()?)
    }

    fn load(
        &self,
        id: HashId,
        expected: Option<DataType>,
    ) -> StoreResult<Option<(DataType, Buffer)>> {
        let Some((ty, buf)) = self.get(id) else {
            return Ok(None);
        };
        if let Some(expected) = expected {
            if expected != ty && ty != DataType::Index {
                return Ok(None);
            }
        }
        Ok(Some((ty, buf)))
    }

    fn put(&self, id: HashId, ty: DataType, content: &[u8]) -> StoreResult<()> {
        self.insert(id, ty, Buffer::from(content));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(n: usize) -> Buffer {
        Buffer::from(vec![7u8; n])
    }

    #[test]
    fn evicts_lru_when_over_capacity() {
        let cache = MemoryCache::new(200);
        let a = HashId::digest(b"a", b"a");
        let b = HashId::digest(b"b", b"b");
        let c = HashId::digest(b"c", b"c");
        cache.insert(a, DataType::Blob, buf(100));
        cache.insert(b, DataType::Blob, buf(100));
        // Touch `a` so `b` becomes the LRU victim on the next insert.
        assert!(cache.get(a).is_some());
        cache.insert(c, DataType::Blob, buf(100));
        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert!(cache.get(c).is_some());
    }

    #[test]
    fn oversized_entry_is_not_cached() {
        let cache = MemoryCache::new(64);
        let id = HashId::digest(b"x", b"x");
        cache.insert(id, DataType::Blob, buf(1024));
        assert!(cache.get(id).is_none());
    }
}
