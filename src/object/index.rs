//! Index objects: chunking metadata for a large logical object.

use crate::hash::HashId;
use crate::header::DataType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexPart {
    pub blob_id: HashId,
    pub size: u64,
}

/// `{original_id, original_type, parts[]}`; the concatenation of part
/// payloads reconstructs the original content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexObject {
    pub original_id: HashId,
    pub original_type: DataType,
    pub parts: Vec<IndexPart>,
}

impl IndexObject {
    pub fn id(&self) -> HashId {
        self.original_id
    }

    pub fn ty(&self) -> DataType {
        self.original_type
    }

    /// Sum of part sizes; equal to the original (pre-chunking) content's
    /// size.
    pub fn size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    pub fn parts(&self) -> &[IndexPart] {
        &self.parts
    }
}
