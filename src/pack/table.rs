//! Reading an immutable pack: a `.index` (fan-out + sorted ids + tags) and a
//! `.pack` (concatenated records) memory-mapped pair.
//!
//! Both files are mapped once at open time and held for the pack's
//! lifetime; every accessor borrows from the mapping or copies out on
//! demand, per the design notes' strategy for "in-object mmap and shared
//! ownership of file maps".

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use memmap2::Mmap;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::hash::HASH_LEN;
use crate::header::DataHeader;
use crate::cache::MemoryCache;
use crate::pack::record::decode_index_tag;
use crate::pack::record::DataTag;
use crate::pack::record::INDEX_TAG_LEN;

/// Bounds the per-pack cache of materialized (decompressed, de-delta'd)
/// Blob/Tree payloads that amortizes repeated reads along a delta chain.
const MATERIALIZED_CACHE_BYTES: usize = 4 * 1024 * 1024;

const FANOUT_ENTRIES: usize = 256;
const FANOUT_BYTES: usize = FANOUT_ENTRIES * 4;

pub struct PackIndex {
    mmap: Mmap,
    count: usize,
}

impl PackIndex {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = fs::File::open(path).map_err(|e| StoreError::io(path.to_path_buf(), e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(path.to_path_buf(), e))?;
        if mmap.len() < FANOUT_BYTES {
            return Err(StoreError::corruption("pack index shorter than fan-out table"));
        }
        let remaining = mmap.len() - FANOUT_BYTES;
        let entry_size = HASH_LEN + INDEX_TAG_LEN;
        if remaining % entry_size != 0 {
            return Err(StoreError::corruption("pack index size is not entry-aligned"));
        }
        Ok(PackIndex {
            count: remaining / entry_size,
            mmap,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn fanout(&self, byte: u8) -> u32 {
        let start = byte as usize * 4;
        u32::from_le_bytes(self.mmap[start..start + 4].try_into().unwrap())
    }

    fn ids_start(&self) -> usize {
        FANOUT_BYTES
    }

    fn tags_start(&self) -> usize {
        FANOUT_BYTES + self.count * HASH_LEN
    }

    pub fn id_at(&self, index: usize) -> HashId {
        let start = self.ids_start() + index * HASH_LEN;
        HashId::from_bytes(&self.mmap[start..start + HASH_LEN]).expect("fixed-width id slice")
    }

    pub fn tag_at(&self, index: usize) -> StoreResult<(DataHeader, u64)> {
        let start = self.tags_start() + index * INDEX_TAG_LEN;
        let mut buf = [0u8; INDEX_TAG_LEN];
        buf.copy_from_slice(&self.mmap[start..start + INDEX_TAG_LEN]);
        decode_index_tag(&buf)
    }

    /// Fan-out + binary search lookup: the first byte selects a `[lo, hi)`
    /// range, then a binary search narrows within it.
    pub fn find(&self, id: HashId) -> StoreResult<Option<(DataHeader, u64)>> {
        if self.count == 0 {
            return Ok(None);
        }
        let first_byte = id.as_bytes()[0];
        let lo = if first_byte == 0 {
            0
        } else {
            self.fanout(first_byte - 1) as usize
        };
        let hi = self.fanout(first_byte) as usize;
        let mut left = lo;
        let mut right = hi;
        while left < right {
            let mid = left + (right - left) / 2;
            let mid_id = self.id_at(mid);
            match mid_id.cmp(&id) {
                std::cmp::Ordering::Equal => return Ok(Some(self.tag_at(mid)?)),
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Greater => right = mid,
            }
        }
        Ok(None)
    }

    pub fn ids(&self) -> impl Iterator<Item = HashId> + '_ {
        (0..self.count).map(move |i| self.id_at(i))
    }
}

/// Builds the `.index` byte layout from already-sorted `(id, header,
/// offset)` tuples.
pub fn build_index_bytes(entries: &[(HashId, DataHeader, u64)]) -> StoreResult<Vec<u8>> {
    let mut fanout = [0u32; FANOUT_ENTRIES];
    for (id, _, _) in entries {
        let byte = id.as_bytes()[0] as usize;
        fanout[byte] += 1;
    }
    // Cumulative counts: cell i = count of ids whose first byte <= i, so an
    // unseen prefix inherits the running total and `[lo, hi)` stays valid.
    let mut running = 0u32;
    for cell in fanout.iter_mut() {
        running += *cell;
        *cell = running;
    }

    let mut out = Vec::with_capacity(FANOUT_BYTES + entries.len() * (HASH_LEN + INDEX_TAG_LEN));
    for cell in fanout {
        out.extend_from_slice(&cell.to_le_bytes());
    }
    for (id, _, _) in entries {
        out.extend_from_slice(id.as_bytes());
    }
    for (_, header, offset) in entries {
        let tag = crate::pack::record::encode_index_tag(*header, *offset)?;
        out.extend_from_slice(&tag);
    }
    Ok(out)
}

pub struct PackData {
    mmap: Mmap,
}

impl PackData {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = fs::File::open(path).map_err(|e| StoreError::io(path.to_path_buf(), e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(path.to_path_buf(), e))?;
        Ok(PackData { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Reads the `DataTag` at `offset` and returns it with a byte slice of
    /// exactly its declared payload length.
    pub fn record_at(&self, offset: u64) -> StoreResult<(DataTag, &[u8])> {
        let offset = offset as usize;
        if offset >= self.mmap.len() {
            return Err(StoreError::corruption("pack record offset out of range"));
        }
        let (tag, consumed) = DataTag::decode(&self.mmap[offset..])?;
        let payload_start = offset + consumed;
        let payload_end = payload_start
            .checked_add(tag.length as usize)
            .ok_or_else(|| StoreError::corruption("pack record length overflow"))?;
        if payload_end > self.mmap.len() {
            return Err(StoreError::corruption("pack record payload out of range"));
        }
        Ok((tag, &self.mmap[payload_start..payload_end]))
    }
}

/// A pair of memory-mapped files naming one immutable pack:
/// `pack-<hex>.<level:03>.{index,pack}`.
pub struct PackFile {
    pub level: u32,
    pub content_hash: String,
    pub index_path: PathBuf,
    pub data_path: PathBuf,
    pub index: PackIndex,
    pub data: PackData,
    pub cache: MemoryCache,
}

impl PackFile {
    pub fn open(index_path: PathBuf, data_path: PathBuf, level: u32, content_hash: String) -> StoreResult<Self> {
        let index = PackIndex::open(&index_path)?;
        let data = PackData::open(&data_path)?;
        Ok(PackFile {
            level,
            content_hash,
            index_path,
            data_path,
            index,
            data,
            cache: MemoryCache::new(MATERIALIZED_CACHE_BYTES),
        })
    }

    pub fn file_name(content_hash: &str, level: u32) -> (String, String) {
        (
            format!("pack-{content_hash}.{level:03}.index"),
            format!("pack-{content_hash}.{level:03}.pack"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DataType;

    #[test]
    fn index_round_trips_and_finds_all_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut ids: Vec<HashId> = (0..64u32)
            .map(|i| HashId::digest(b"x", &i.to_le_bytes()))
            .collect();
        ids.sort();
        let entries: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    *id,
                    DataHeader::new(DataType::Blob, i as u64).unwrap(),
                    (i * 10) as u64,
                )
            })
            .collect();
        let bytes = build_index_bytes(&entries).unwrap();
        let path = dir.path().join("test.index");
        fs::write(&path, &bytes).unwrap();
        let index = PackIndex::open(&path).unwrap();
        assert_eq!(index.len(), entries.len());
        for (id, header, offset) in &entries {
            let (found_header, found_offset) = index.find(*id).unwrap().unwrap();
            assert_eq!(found_header, *header);
            assert_eq!(found_offset, *offset);
        }
        let missing = HashId::digest(b"nope", b"nope");
        assert!(index.find(missing).unwrap().is_none());
    }
}
