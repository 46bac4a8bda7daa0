//! Tree objects: an ordered, strictly-ascending list of named entries.

use crate::error::StoreError;
use crate::hash::HashId;
use crate::object::PathType;
use crate::repo_path::RepoPathComponentBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: RepoPathComponentBuf,
    pub id: HashId,
    pub kind: PathType,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn empty() -> Self {
        Tree { entries: Vec::new() }
    }

    /// Builds a tree from already name-sorted, deduplicated entries. Use
    /// [`Tree::from_entries`] when the caller has not yet ordered them.
    pub fn from_sorted_entries(entries: Vec<TreeEntry>) -> Result<Self, StoreError> {
        for window in entries.windows(2) {
            if window[0].name >= window[1].name {
                return Err(StoreError::InvalidArgument(format!(
                    "tree entries must be strictly ascending by name, got {:?} >= {:?}",
                    window[0].name, window[1].name
                )));
            }
        }
        Ok(Tree { entries })
    }

    /// Builds a tree from unordered entries, sorting by name. Errors on a
    /// duplicate name.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Result<Self, StoreError> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self::from_sorted_entries(entries)
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &TreeEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Binary search by name.
    pub fn find(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}
