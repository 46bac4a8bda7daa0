//! The immutable, typed object model.
//!
//! [`Object`] is a plain enum over the decoded kinds rather than a
//! downcast-from-a-shared-buffer view (the first strategy offered in the
//! design notes): each variant owns its decoded fields, which keeps the
//! accessors infallible after construction and avoids re-deriving the
//! `Arc<[u8]>`-views-and-downcast machinery a protobuf-backed object store
//! needs for its wire format, which this crate does not carry forward.

pub mod commit;
pub mod index;
pub mod renames;
pub mod tree;

use std::sync::Arc;

pub use commit::Commit;
pub use commit::Signature;
pub use index::IndexObject;
pub use index::IndexPart;
pub use renames::CopyRecord;
pub use renames::Renames;
pub use tree::Tree;
pub use tree::TreeEntry;

use crate::hash::HashId;
use crate::header::DataType;

/// Shared, reference-counted byte buffer backing canonical object payloads.
pub type Buffer = Arc<[u8]>;

/// The kind of entry a path can reference, distinct from the stored
/// object's own header type: a `Symlink` entry still points at a `Blob`
/// whose content is the link target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathType {
    File,
    Directory,
    Executable,
    Symlink,
}

impl PathType {
    pub fn is_file(self) -> bool {
        matches!(self, PathType::File | PathType::Executable | PathType::Symlink)
    }

    pub fn is_directory(self) -> bool {
        matches!(self, PathType::Directory)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, PathType::Symlink)
    }

    fn tag(self) -> u8 {
        match self {
            PathType::File => 0,
            PathType::Directory => 1,
            PathType::Executable => 2,
            PathType::Symlink => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => PathType::File,
            1 => PathType::Directory,
            2 => PathType::Executable,
            3 => PathType::Symlink,
            _ => return None,
        })
    }
}

/// A value shared by staging and trees: the entry a tree names, plus an
/// auxiliary flag recording whether `id` resolves directly or through an
/// `Index` indirection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathEntry {
    pub id: HashId,
    pub kind: PathType,
    pub size: u64,
    pub indexed: bool,
}

impl PathEntry {
    pub fn new(id: HashId, kind: PathType, size: u64) -> Self {
        PathEntry {
            id,
            kind,
            size,
            indexed: false,
        }
    }
}

pub(crate) fn encode_path_type(ty: PathType) -> u8 {
    ty.tag()
}

pub(crate) fn decode_path_type(tag: u8) -> Option<PathType> {
    PathType::from_tag(tag)
}

/// A decoded, content-addressed object.
#[derive(Clone, Debug)]
pub enum Object {
    Blob(Buffer),
    Tree(Tree),
    Commit(Commit),
    Renames(Renames),
    Index(IndexObject),
}

impl Object {
    /// Decodes a typed payload, failing if `ty` is not decodable (`Tag`).
    pub fn load(ty: DataType, bytes: Buffer) -> crate::error::StoreResult<Self> {
        crate::serialize::decode_object(ty, bytes)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Object::Blob(_) => DataType::Blob,
            Object::Tree(_) => DataType::Tree,
            Object::Commit(_) => DataType::Commit,
            Object::Renames(_) => DataType::Renames,
            Object::Index(_) => DataType::Index,
        }
    }

    pub fn as_blob(&self) -> Option<&Buffer> {
        match self {
            Object::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Object::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Object::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_renames(&self) -> Option<&Renames> {
        match self {
            Object::Renames(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<&IndexObject> {
        match self {
            Object::Index(i) => Some(i),
            _ => None,
        }
    }
}
