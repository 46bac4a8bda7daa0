//! Content hash identifiers.
//!
//! A [`HashId`] is the 20-byte SHA-1 digest of a typed header followed by an
//! object's canonical payload. The all-zero id is reserved to mean "null"
//! (absence of a reference), matching the original store's `operator bool`.

use std::fmt;
use std::str::FromStr;

use sha1::Digest as _;
use sha1::Sha1;

use crate::error::StoreError;

pub const HASH_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashId([u8; HASH_LEN]);

impl HashId {
    pub const NULL: HashId = HashId([0; HASH_LEN]);

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != HASH_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "hash id must be {HASH_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(bytes);
        Ok(HashId(buf))
    }

    pub const fn from_array(bytes: [u8; HASH_LEN]) -> Self {
        HashId(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, StoreError> {
        let bytes = hex::decode(hex)
            .map_err(|e| StoreError::InvalidArgument(format!("invalid hex id: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; HASH_LEN]
    }

    /// Builds an id by hashing `header || content`, the only sanctioned way
    /// to mint a [`HashId`].
    pub fn digest(header: &[u8], content: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(header);
        hasher.update(content);
        let digest = hasher.finalize();
        let mut buf = [0u8; HASH_LEN];
        buf.copy_from_slice(&digest);
        HashId(buf)
    }
}

impl fmt::Debug for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashId({})", self.to_hex())
    }
}

impl fmt::Display for HashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for HashId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Default for HashId {
    fn default() -> Self {
        HashId::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_is_falsy() {
        assert!(HashId::NULL.is_null());
        assert!(!HashId::digest(b"x", b"y").is_null());
    }

    #[test]
    fn hex_round_trips() {
        let id = HashId::digest(b"header", b"content");
        let hex = id.to_hex();
        assert_eq!(HashId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = HashId::from_bytes(&[0; HASH_LEN]).unwrap();
        let mut hi = [0u8; HASH_LEN];
        hi[0] = 1;
        let b = HashId::from_bytes(&hi).unwrap();
        assert!(a < b);
    }
}
