//! Loose object backend: one file per id, `<root>/<first-2-hex>/<hex>`.
//!
//! File layout (little-endian): a 16-byte [`LooseHeader`], then `stored`
//! bytes of payload (optionally LZ4-compressed), then an 8-byte XXH3-64 of
//! that payload. Atomic writes follow `simple_backend.rs`'s
//! `persist_content_addressed_temp_file` pattern: write to a
//! `tempfile::NamedTempFile` alongside the destination, then `persist`
//! (rename is atomic on the same filesystem).

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh32::xxh32;

use crate::backend::Backend;
use crate::backend::BackendMeta;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::hash::HASH_LEN;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::object::Buffer;

pub const MAX_OBJECT_SIZE: u64 = 128 * 1024 * 1024;
const HEADER_LEN: usize = 16;
const VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    None,
    Lz4,
}

impl Codec {
    fn tag(self) -> u32 {
        match self {
            Codec::None => 0,
            Codec::Lz4 => 1,
        }
    }

    fn from_tag(tag: u32) -> StoreResult<Self> {
        Ok(match tag {
            0 => Codec::None,
            1 => Codec::Lz4,
            other => {
                return Err(StoreError::corruption(format!(
                    "unknown loose object codec {other}"
                )));
            }
        })
    }
}

fn data_type_tag(ty: DataType) -> u32 {
    match ty {
        DataType::Blob => 0,
        DataType::Tree => 1,
        DataType::Commit => 2,
        DataType::Renames => 3,
        DataType::Tag => 4,
        DataType::Index => 5,
    }
}

fn data_type_from_tag(tag: u32) -> StoreResult<DataType> {
    Ok(match tag {
        0 => DataType::Blob,
        1 => DataType::Tree,
        2 => DataType::Commit,
        3 => DataType::Renames,
        4 => DataType::Tag,
        5 => DataType::Index,
        other => {
            return Err(StoreError::corruption(format!(
                "unknown loose object type tag {other}"
            )));
        }
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LooseHeader {
    pub ty: DataType,
    pub codec: Codec,
    pub original_len: u32,
    pub stored_len: u32,
}

impl LooseHeader {
    fn pack_tag(&self) -> u32 {
        let has_checksum = 1u32;
        (VERSION & 0x7) | ((data_type_tag(self.ty) & 0xF) << 3) | (has_checksum << 7) | ((self.codec.tag() & 0x7) << 8)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let tag = self.pack_tag();
        buf[0..4].copy_from_slice(&tag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.original_len.to_le_bytes());
        buf[8..12].copy_from_slice(&self.stored_len.to_le_bytes());
        let crc = xxh32(&buf[0..12], 0);
        buf[12..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::corruption("loose file shorter than its header"));
        }
        let tag = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let original_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let stored_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let crc = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let expected_crc = xxh32(&bytes[0..12], 0);
        if crc != expected_crc {
            return Err(StoreError::corruption(
                "loose object header checksum mismatch",
            ));
        }
        let version = tag & 0x7;
        if version != VERSION {
            return Err(StoreError::corruption(format!(
                "unsupported loose object version {version}"
            )));
        }
        let ty = data_type_from_tag((tag >> 3) & 0xF)?;
        let has_checksum = (tag >> 7) & 0x1;
        if has_checksum != 1 {
            return Err(StoreError::corruption(
                "loose object missing trailing checksum flag",
            ));
        }
        let codec = Codec::from_tag((tag >> 8) & 0x7)?;
        Ok(LooseHeader {
            ty,
            codec,
            original_len,
            stored_len,
        })
    }
}

/// Loose-file-shaped framing (`header || payload || xxh3(payload)`), shared
/// verbatim by the memtable record format (which appends a 20-byte id).
pub fn encode_frame(ty: DataType, content: &[u8]) -> StoreResult<Vec<u8>> {
    if content.len() as u64 > MAX_OBJECT_SIZE {
        return Err(StoreError::corruption(format!(
            "object of {} bytes exceeds the {} byte loose object limit",
            content.len(),
            MAX_OBJECT_SIZE
        )));
    }
    let compressed = lz4_flex::compress_prepend_size(content);
    let (codec, payload): (Codec, &[u8]) = if compressed.len() < content.len() {
        (Codec::Lz4, &compressed)
    } else {
        (Codec::None, content)
    };
    let header = LooseHeader {
        ty,
        codec,
        original_len: content.len() as u32,
        stored_len: payload.len() as u32,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out.extend_from_slice(&xxh3_64(payload).to_le_bytes());
    Ok(out)
}

/// The inverse of [`encode_frame`]: validates both checksums and
/// decompresses, returning `(header, decompressed content)`.
pub fn decode_frame(bytes: &[u8]) -> StoreResult<(LooseHeader, Vec<u8>)> {
    let header = LooseHeader::decode(bytes)?;
    let payload_start = HEADER_LEN;
    let payload_end = payload_start + header.stored_len as usize;
    if bytes.len() < payload_end + CHECKSUM_LEN {
        return Err(StoreError::corruption("loose file truncated"));
    }
    let payload = &bytes[payload_start..payload_end];
    let checksum_bytes = &bytes[payload_end..payload_end + CHECKSUM_LEN];
    let expected = u64::from_le_bytes(checksum_bytes.try_into().unwrap());
    if xxh3_64(payload) != expected {
        return Err(StoreError::corruption(
            "loose object payload checksum mismatch",
        ));
    }
    let content = match header.codec {
        Codec::None => payload.to_vec(),
        Codec::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| StoreError::corruption(format!("lz4 decompression failed: {e}")))?,
    };
    if content.len() as u64 != header.original_len as u64 {
        return Err(StoreError::corruption(
            "decompressed loose object size disagrees with header",
        ));
    }
    Ok((header, content))
}

/// Total on-disk framing size for `encode_frame`'s output, used by callers
/// that need to size buffers up front (e.g. the memtable).
pub fn frame_len(bytes: &[u8]) -> usize {
    bytes.len()
}

#[derive(Debug)]
pub struct LooseBackend {
    root: PathBuf,
    fdatasync: bool,
}

impl LooseBackend {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(root.clone(), e))?;
        Ok(LooseBackend {
            root,
            fdatasync: true,
        })
    }

    pub fn with_fdatasync(mut self, enabled: bool) -> Self {
        self.fdatasync = enabled;
        self
    }

    fn path_for(&self, id: HashId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// Walks the first-level fan-out directories and yields the ids parsed
    /// from filenames. A missing root or fan-out directory enumerates as
    /// empty rather than erroring (matching `vcs/store/loose.cpp`'s
    /// `ENOENT`-as-empty convention).
    pub fn enumerate(&self) -> StoreResult<Vec<HashId>> {
        let mut ids = Vec::new();
        let top = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StoreError::io(self.root.clone(), e)),
        };
        for fanout in top {
            let fanout = fanout.map_err(|e| StoreError::io(self.root.clone(), e))?;
            if !fanout.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir_path = fanout.path();
            let inner = match fs::read_dir(&dir_path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir_path.clone(), e)),
            };
            for file in inner {
                let file = file.map_err(|e| StoreError::io(dir_path.clone(), e))?;
                let name = file.file_name();
                let Some(hex) = name.to_str() else { continue };
                if let Ok(id) = HashId::from_hex(hex) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn read_raw(&self, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path.to_path_buf(), e)),
        }
    }
}

impl Backend for LooseBackend {
    fn name(&self) -> &str {
        "loose"
    }

    fn get_meta(&self, id: HashId) -> StoreResult<Option<BackendMeta>> {
        let path = self.path_for(id);
        let Some(bytes) = self.read_raw(&path)? else {
            return Ok(None);
        };
        let header = LooseHeader::decode(&bytes)?;
        Ok(Some(DataHeader::new(header.ty, header.original_len as u64)?))
    }

    fn exists(&self, id: HashId) -> StoreResult<bool> {
        Ok(self.path_for(id).is_file())
    }

    fn load(
        &self,
        id: HashId,
        expected: Option<DataType>,
    ) -> StoreResult<Option<(DataType, Buffer)>> {
        let path = self.path_for(id);
        let Some(bytes) = self.read_raw(&path)? else {
            return Ok(None);
        };
        let (header, content) = decode_frame(&bytes)?;
        if let Some(expected) = expected {
            if expected != header.ty && header.ty != DataType::Index {
                return Ok(None);
            }
        }
        Ok(Some((header.ty, Buffer::from(content))))
    }

    fn put(&self, id: HashId, ty: DataType, content: &[u8]) -> StoreResult<()> {
        let path = self.path_for(id);
        if path.is_file() {
            return Ok(());
        }
        let Some(parent) = path.parent() else {
            return Err(StoreError::InvalidArgument(
                "loose object path has no parent directory".into(),
            ));
        };
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent.to_path_buf(), e))?;
        let frame = encode_frame(ty, content)?;
        let mut temp_file =
            NamedTempFile::new_in(parent).map_err(|e| StoreError::io(parent.to_path_buf(), e))?;
        temp_file
            .write_all(&frame)
            .map_err(|e| StoreError::io(path.clone(), e))?;
        if self.fdatasync {
            temp_file
                .as_file()
                .sync_data()
                .map_err(|e| StoreError::io(path.clone(), e))?;
        }
        temp_file
            .persist(&path)
            .map_err(|e| StoreError::io(path.clone(), e.error))?;
        Ok(())
    }
}
