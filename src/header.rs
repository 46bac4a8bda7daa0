//! The typed `(type, size)` header prefix folded into every object's hash.
//!
//! Layout: the first byte packs `size_byte_count` (high nibble) and
//! `DataType` (low nibble); `size_byte_count` further little-endian bytes
//! hold the size. This makes the header 1–8 bytes and self-describing from
//! its first byte, as required by the data model.

use crate::error::StoreError;

const MAX_SIZE_BYTES: usize = 7;
pub const MAX_SIZE: u64 = (1u64 << 48) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataType {
    Blob = 0,
    Tree = 1,
    Commit = 2,
    Renames = 3,
    Tag = 4,
    Index = 5,
}

impl DataType {
    fn from_tag(tag: u8) -> Result<Self, StoreError> {
        Ok(match tag {
            0 => DataType::Blob,
            1 => DataType::Tree,
            2 => DataType::Commit,
            3 => DataType::Renames,
            4 => DataType::Tag,
            5 => DataType::Index,
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "unknown data type tag {other}"
                )));
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataHeader {
    ty: DataType,
    size: u64,
}

impl DataHeader {
    pub fn new(ty: DataType, size: u64) -> Result<Self, StoreError> {
        if size > MAX_SIZE {
            return Err(StoreError::InvalidArgument(format!(
                "object size {size} exceeds 48-bit header limit"
            )));
        }
        Ok(DataHeader { ty, size })
    }

    pub fn ty(&self) -> DataType {
        self.ty
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn size_byte_count(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            let bits = 64 - self.size.leading_zeros() as usize;
            bits.div_ceil(8)
        }
    }

    /// Encodes the header, appending it to `out`. Returns the number of
    /// bytes written (1–8).
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        let size_bytes = self.size_byte_count();
        debug_assert!(size_bytes <= MAX_SIZE_BYTES);
        let first = ((size_bytes as u8) << 4) | (self.ty as u8);
        out.push(first);
        let le = self.size.to_le_bytes();
        out.extend_from_slice(&le[..size_bytes]);
        1 + size_bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        self.encode(&mut buf);
        buf
    }

    /// Decodes a header from the front of `bytes`, returning the header and
    /// the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), StoreError> {
        let first = *bytes
            .first()
            .ok_or_else(|| StoreError::InvalidArgument("empty header".into()))?;
        let size_bytes = (first >> 4) as usize;
        if size_bytes > MAX_SIZE_BYTES {
            return Err(StoreError::InvalidArgument(format!(
                "header declares {size_bytes} size bytes, max is {MAX_SIZE_BYTES}"
            )));
        }
        let ty = DataType::from_tag(first & 0x0F)?;
        if bytes.len() < 1 + size_bytes {
            return Err(StoreError::InvalidArgument("truncated header".into()));
        }
        let mut le = [0u8; 8];
        le[..size_bytes].copy_from_slice(&bytes[1..1 + size_bytes]);
        let size = u64::from_le_bytes(le);
        Ok((DataHeader { ty, size }, 1 + size_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_zero_size() {
        let hdr = DataHeader::new(DataType::Blob, 0).unwrap();
        let bytes = hdr.to_bytes();
        assert_eq!(bytes.len(), 1);
        let (decoded, consumed) = DataHeader::decode(&bytes).unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn round_trips_large_size() {
        let hdr = DataHeader::new(DataType::Index, 8703).unwrap();
        let bytes = hdr.to_bytes();
        let (decoded, consumed) = DataHeader::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.size(), 8703);
        assert_eq!(decoded.ty(), DataType::Index);
    }

    #[test]
    fn rejects_oversized() {
        assert!(DataHeader::new(DataType::Blob, MAX_SIZE + 1).is_err());
    }

    #[test]
    fn header_is_self_describing_length() {
        for size in [0u64, 1, 255, 256, 70_000, MAX_SIZE] {
            let hdr = DataHeader::new(DataType::Tree, size).unwrap();
            let bytes = hdr.to_bytes();
            assert!(bytes.len() <= 8);
            let declared = 1 + (bytes[0] >> 4) as usize;
            assert_eq!(declared, bytes.len());
        }
    }
}
