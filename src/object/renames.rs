//! Renames objects: the copy-provenance attached to a commit.

use crate::hash::HashId;
use crate::repo_path::RepoPathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyRecord {
    /// Index into `Renames::commits`.
    pub commit_idx: u32,
    pub source_path: RepoPathBuf,
    pub dest_path: RepoPathBuf,
}

/// `{commits[], copies[], replaces[]}`. `commits` is the dense set of source
/// commits referenced by `copies` and may include a commit that is not
/// among the owning commit's current parents.
///
/// `replaces` is written but, since its read semantics are otherwise
/// unspecified, treated as documentary only: it is never consulted by the
/// change-list builder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Renames {
    pub commits: Vec<HashId>,
    pub copies: Vec<CopyRecord>,
    pub replaces: Vec<HashId>,
}

impl Renames {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() && self.copies.is_empty() && self.replaces.is_empty()
    }
}
