//! Level 0: the append-only memtable.
//!
//! A record is loose-style framing (`LooseHeader || payload ||
//! xxh3(payload)`, see [`crate::loose`]) with a 20-byte id appended. The
//! active memtable mirrors its file in an in-memory buffer (bounded by
//! `capacity`, a few MiB by default) so reads never need to reopen the file;
//! `commit()` still `fsync`s the on-disk copy for durability. Once full, it
//! is finalized: mmapped read-only and renamed to embed a monotonically
//! increasing sequence number.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use memmap2::Mmap;

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::hash::HASH_LEN;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::loose;

pub const DEFAULT_CAPACITY: u64 = 8 * 1024 * 1024;
const CHECKSUM_LEN: usize = 8;
const HEADER_LEN: usize = 16;

/// Non-error control signal for a full table, per the design notes'
/// replacement for the source's exception-based rotation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    Full,
}

/// Scans loose-style records from `buffer`, returning the id map and the
/// number of bytes that formed complete, valid records. When
/// `tolerate_trailing_truncation` is set, a partial or corrupt final record
/// ends the scan instead of failing it (restoring the currently-active
/// memtable after an unclean shutdown); finalized memtables scan strictly.
fn scan_records(
    buffer: &[u8],
    tolerate_trailing_truncation: bool,
) -> StoreResult<(HashMap<HashId, (DataHeader, u64)>, usize)> {
    let mut ids = HashMap::new();
    let mut pos = 0usize;
    while pos < buffer.len() {
        match scan_one(buffer, pos) {
            Ok((id, header, record_len)) => {
                ids.insert(id, (header, pos as u64));
                pos += record_len;
            }
            Err(e) => {
                if tolerate_trailing_truncation {
                    break;
                }
                return Err(e);
            }
        }
    }
    Ok((ids, pos))
}

fn scan_one(buffer: &[u8], pos: usize) -> StoreResult<(HashId, DataHeader, usize)> {
    let slice = &buffer[pos..];
    if slice.len() < HEADER_LEN {
        return Err(StoreError::corruption("truncated memtable record header"));
    }
    let loose_header = loose::LooseHeader::decode(slice)?;
    let record_len = HEADER_LEN + loose_header.stored_len as usize + CHECKSUM_LEN + HASH_LEN;
    if slice.len() < record_len {
        return Err(StoreError::corruption("truncated memtable record"));
    }
    let (_, content) = loose::decode_frame(&slice[..record_len - HASH_LEN])?;
    let id = HashId::from_bytes(&slice[record_len - HASH_LEN..record_len])?;
    let header = DataHeader::new(loose_header.ty, content.len() as u64)?;
    Ok((id, header, record_len))
}

pub struct ActiveMemtable {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    capacity: u64,
    ids: HashMap<HashId, (DataHeader, u64)>,
}

impl ActiveMemtable {
    /// Opens (creating if absent) the active memtable file at `path`,
    /// restoring its id map by scanning existing records and tolerating a
    /// truncated trailing record.
    pub fn open(path: PathBuf, capacity: u64) -> StoreResult<Self> {
        let existing = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::io(path.clone(), e)),
        };
        let (ids, valid_len) = scan_records(&existing, true)?;
        let buffer = existing[..valid_len].to_vec();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(path.clone(), e))?;
        if valid_len < existing.len() {
            // Drop the trailing partial record on disk too, so a future
            // restore doesn't have to re-discover the same truncation.
            file.set_len(valid_len as u64)
                .map_err(|e| StoreError::io(path.clone(), e))?;
        }
        Ok(ActiveMemtable {
            path,
            file,
            buffer,
            capacity,
            ids,
        })
    }

    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: HashId) -> bool {
        self.ids.contains_key(&id)
    }

    pub fn get_meta(&self, id: HashId) -> Option<DataHeader> {
        self.ids.get(&id).map(|(header, _)| *header)
    }

    pub fn get(&self, id: HashId) -> StoreResult<Option<(DataType, Vec<u8>)>> {
        let Some((header, offset)) = self.ids.get(&id) else {
            return Ok(None);
        };
        let (_, content) = loose::decode_frame(&self.buffer[*offset as usize..])?;
        Ok(Some((header.ty(), content)))
    }

    pub fn ids(&self) -> impl Iterator<Item = HashId> + '_ {
        self.ids.keys().copied()
    }

    /// Appends a record unless doing so would exceed `capacity`, in which
    /// case it signals [`PutOutcome::Full`] without writing anything — the
    /// caller finalizes this table and retries on a fresh one.
    pub fn put(&mut self, id: HashId, ty: DataType, content: &[u8]) -> StoreResult<PutOutcome> {
        if self.ids.contains_key(&id) {
            return Ok(PutOutcome::Written);
        }
        let mut record = loose::encode_frame(ty, content)?;
        record.extend_from_slice(id.as_bytes());
        if !self.buffer.is_empty() && self.buffer.len() as u64 + record.len() as u64 > self.capacity
        {
            return Ok(PutOutcome::Full);
        }
        let offset = self.buffer.len() as u64;
        self.file
            .write_all(&record)
            .map_err(|e| StoreError::io(self.path.clone(), e))?;
        self.buffer.extend_from_slice(&record);
        let header = DataHeader::new(ty, content.len() as u64)?;
        self.ids.insert(id, (header, offset));
        Ok(PutOutcome::Written)
    }

    /// Forces the active memtable's file to flush to disk.
    pub fn commit(&self) -> StoreResult<()> {
        self.file
            .sync_data()
            .map_err(|e| StoreError::io(self.path.clone(), e))
    }

    /// Seals this table: renames its file to `<stem>.<sequence:05>` and
    /// memory-maps it read-only.
    pub fn finalize(self, final_path: PathBuf, sequence: u64) -> StoreResult<FinalizedMemtable> {
        self.commit()?;
        drop(self.file);
        fs::rename(&self.path, &final_path).map_err(|e| StoreError::io(final_path.clone(), e))?;
        FinalizedMemtable::open(final_path, sequence)
    }
}

pub struct FinalizedMemtable {
    pub path: PathBuf,
    pub sequence: u64,
    mmap: Mmap,
    ids: HashMap<HashId, (DataHeader, u64)>,
}

impl FinalizedMemtable {
    pub fn open(path: PathBuf, sequence: u64) -> StoreResult<Self> {
        let file = fs::File::open(&path).map_err(|e| StoreError::io(path.clone(), e))?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(path.clone(), e))?;
        let (ids, valid_len) = scan_records(&mmap, false)?;
        if valid_len != mmap.len() {
            return Err(StoreError::corruption(
                "finalized memtable contains trailing bytes past its last record",
            ));
        }
        Ok(FinalizedMemtable {
            path,
            sequence,
            mmap,
            ids,
        })
    }

    pub fn get_meta(&self, id: HashId) -> Option<DataHeader> {
        self.ids.get(&id).map(|(header, _)| *header)
    }

    pub fn get(&self, id: HashId) -> StoreResult<Option<(DataType, Vec<u8>)>> {
        let Some((header, offset)) = self.ids.get(&id) else {
            return Ok(None);
        };
        let (_, content) = loose::decode_frame(&self.mmap[*offset as usize..])?;
        Ok(Some((header.ty(), content)))
    }

    pub fn ids(&self) -> impl Iterator<Item = HashId> + '_ {
        self.ids.keys().copied()
    }

    pub fn byte_len(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_and_full_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memtable.part");
        let mut table = ActiveMemtable::open(path, 64).unwrap();
        let id = HashId::digest(b"h", b"x");
        assert_eq!(table.put(id, DataType::Blob, b"x").unwrap(), PutOutcome::Written);
        let (ty, content) = table.get(id).unwrap().unwrap();
        assert_eq!(ty, DataType::Blob);
        assert_eq!(content, b"x");

        let big_id = HashId::digest(b"h", b"big");
        let outcome = table.put(big_id, DataType::Blob, &vec![0u8; 128]).unwrap();
        assert_eq!(outcome, PutOutcome::Full);
    }

    #[test]
    fn restore_tolerates_truncated_trailing_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memtable.part");
        {
            let mut table = ActiveMemtable::open(path.clone(), DEFAULT_CAPACITY).unwrap();
            table.put(HashId::digest(b"h", b"a"), DataType::Blob, b"a").unwrap();
            table.put(HashId::digest(b"h", b"b"), DataType::Blob, b"b").unwrap();
            table.commit().unwrap();
        }
        // Truncate the file mid-record to simulate a crash.
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        fs::write(&path, &bytes).unwrap();

        let restored = ActiveMemtable::open(path, DEFAULT_CAPACITY).unwrap();
        assert!(restored.contains(HashId::digest(b"h", b"a")));
        assert!(!restored.contains(HashId::digest(b"h", b"b")));
    }

    #[test]
    fn finalize_renames_and_mmaps() {
        let dir = tempfile::tempdir().unwrap();
        let active_path = dir.path().join("memtable.part");
        let mut table = ActiveMemtable::open(active_path, DEFAULT_CAPACITY).unwrap();
        let id = HashId::digest(b"h", b"x");
        table.put(id, DataType::Blob, b"x").unwrap();
        let final_path = dir.path().join("memtable.00001");
        let finalized = table.finalize(final_path.clone(), 1).unwrap();
        assert_eq!(finalized.sequence, 1);
        assert!(final_path.is_file());
        let (ty, content) = finalized.get(id).unwrap().unwrap();
        assert_eq!(ty, DataType::Blob);
        assert_eq!(content, b"x");
    }
}
