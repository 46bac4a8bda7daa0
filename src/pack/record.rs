//! Tag encodings used inside a pack's `.pack` and `.index` files.

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::hash::HASH_LEN;
use crate::header::DataHeader;
use crate::varint;

/// Precedes every record's payload in a `.pack` file: `{length,
/// is_compressed, is_delta}`. Encoded as one flags byte followed by a
/// varint length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataTag {
    pub length: u64,
    pub is_compressed: bool,
    pub is_delta: bool,
}

impl DataTag {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let flags = (self.is_compressed as u8) | ((self.is_delta as u8) << 1);
        out.push(flags);
        varint::encode(self.length, out);
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<(Self, usize)> {
        let flags = *bytes
            .first()
            .ok_or_else(|| StoreError::corruption("truncated data tag"))?;
        let (length, consumed) = varint::decode(&bytes[1..])
            .ok_or_else(|| StoreError::corruption("truncated data tag length"))?;
        Ok((
            DataTag {
                length,
                is_compressed: flags & 0x1 != 0,
                is_delta: flags & 0x2 != 0,
            },
            1 + consumed,
        ))
    }
}

/// A delta record's payload header: `base_id (20B) || original_length
/// (u32 LE)`, prepended to the delta op stream.
pub struct DeltaHeader {
    pub base_id: HashId,
    pub original_length: u32,
}

impl DeltaHeader {
    pub const LEN: usize = HASH_LEN + 4;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.base_id.as_bytes());
        out.extend_from_slice(&self.original_length.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < Self::LEN {
            return Err(StoreError::corruption("truncated delta header"));
        }
        let base_id = HashId::from_bytes(&bytes[0..HASH_LEN])?;
        let original_length = u32::from_le_bytes(bytes[HASH_LEN..Self::LEN].try_into().unwrap());
        Ok(DeltaHeader {
            base_id,
            original_length,
        })
    }
}

/// `IndexTag { meta: DataHeader (<=8B), offset }`, fixed at 12 bytes: the
/// header occupies its self-describing prefix length and the offset fills
/// whatever bytes remain, as a little-endian integer.
pub const INDEX_TAG_LEN: usize = 12;

pub fn encode_index_tag(header: DataHeader, offset: u64) -> StoreResult<[u8; INDEX_TAG_LEN]> {
    let mut buf = [0u8; INDEX_TAG_LEN];
    let header_bytes = header.to_bytes();
    if header_bytes.len() > INDEX_TAG_LEN {
        return Err(StoreError::corruption("header too large for index tag"));
    }
    buf[..header_bytes.len()].copy_from_slice(&header_bytes);
    let remaining = INDEX_TAG_LEN - header_bytes.len();
    let offset_bytes = offset.to_le_bytes();
    if remaining < 8 && offset >= (1u64 << (remaining * 8)) {
        return Err(StoreError::corruption("pack offset too large for index tag"));
    }
    buf[header_bytes.len()..].copy_from_slice(&offset_bytes[..remaining]);
    Ok(buf)
}

pub fn decode_index_tag(bytes: &[u8; INDEX_TAG_LEN]) -> StoreResult<(DataHeader, u64)> {
    let (header, consumed) = DataHeader::decode(bytes)?;
    let remaining = INDEX_TAG_LEN - consumed;
    let mut offset_bytes = [0u8; 8];
    offset_bytes[..remaining].copy_from_slice(&bytes[consumed..]);
    Ok((header, u64::from_le_bytes(offset_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DataType;

    #[test]
    fn data_tag_round_trips() {
        for (len, compressed, delta) in [(0u64, false, false), (1, true, false), (70_000, false, true)] {
            let tag = DataTag {
                length: len,
                is_compressed: compressed,
                is_delta: delta,
            };
            let mut out = Vec::new();
            tag.encode(&mut out);
            let (decoded, consumed) = DataTag::decode(&out).unwrap();
            assert_eq!(consumed, out.len());
            assert_eq!(decoded, tag);
        }
    }

    #[test]
    fn index_tag_round_trips() {
        let header = DataHeader::new(DataType::Tree, 12345).unwrap();
        let encoded = encode_index_tag(header, 987_654).unwrap();
        let (decoded_header, offset) = decode_index_tag(&encoded).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(offset, 987_654);
    }

    #[test]
    fn delta_header_round_trips() {
        let header = DeltaHeader {
            base_id: HashId::digest(b"h", b"base"),
            original_length: 4096,
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        let decoded = DeltaHeader::decode(&out).unwrap();
        assert_eq!(decoded.base_id, header.base_id);
        assert_eq!(decoded.original_length, header.original_length);
    }
}
