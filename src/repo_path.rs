//! Slash-separated repository paths.
//!
//! A [`RepoPathBuf`] is the `/`-joined path used by the stage area and
//! change-list builder (`"lib/test.h"`). A [`RepoPathComponent`] is a single
//! path segment — the name stored in a tree entry — validated to be
//! non-empty, not `.` or `..`, and never containing `/`.

use std::fmt;

use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathComponentBuf(String);

impl RepoPathComponentBuf {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(StoreError::InvalidArgument(format!(
                "invalid path component {name:?}"
            )));
        }
        Ok(RepoPathComponentBuf(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoPathComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `/`-joined relative path; the empty path denotes the tree root.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPathBuf(String);

impl RepoPathBuf {
    pub fn root() -> Self {
        RepoPathBuf(String::new())
    }

    pub fn from_internal_string(s: impl Into<String>) -> Self {
        RepoPathBuf(s.into())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, component: &RepoPathComponentBuf) -> Self {
        if self.is_root() {
            RepoPathBuf(component.as_str().to_owned())
        } else {
            RepoPathBuf(format!("{}/{}", self.0, component.as_str()))
        }
    }

    /// Splits into `(parent, basename)`, or `None` at the root.
    pub fn split(&self) -> Option<(RepoPathBuf, RepoPathComponentBuf)> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some((
                RepoPathBuf(self.0[..idx].to_owned()),
                RepoPathComponentBuf(self.0[idx + 1..].to_owned()),
            )),
            None => Some((RepoPathBuf::root(), RepoPathComponentBuf(self.0.clone()))),
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// True if `self` equals `prefix` or extends it at a `/` boundary, the
    /// rule used by the change-list builder's `include` filter.
    pub fn starts_with_prefix(&self, prefix: &RepoPathBuf) -> bool {
        if prefix.is_root() {
            return true;
        }
        if self.0 == prefix.0 {
            return true;
        }
        self.0
            .strip_prefix(prefix.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// True if `prefix` passes through `self` as an ancestor (i.e. `self` is
    /// a strict prefix of `prefix`, or equal to it).
    pub fn is_ancestor_of_prefix(&self, prefix: &RepoPathBuf) -> bool {
        prefix.starts_with_prefix(self)
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dot_dotdot_slash_empty() {
        assert!(RepoPathComponentBuf::new("").is_err());
        assert!(RepoPathComponentBuf::new(".").is_err());
        assert!(RepoPathComponentBuf::new("..").is_err());
        assert!(RepoPathComponentBuf::new("a/b").is_err());
        assert!(RepoPathComponentBuf::new("main.cpp").is_ok());
    }

    #[test]
    fn join_and_split_round_trip() {
        let root = RepoPathBuf::root();
        let bin = root.join(&RepoPathComponentBuf::new("bin").unwrap());
        let main = bin.join(&RepoPathComponentBuf::new("main.cpp").unwrap());
        assert_eq!(main.as_str(), "bin/main.cpp");
        let (parent, name) = main.split().unwrap();
        assert_eq!(parent.as_str(), "bin");
        assert_eq!(name.as_str(), "main.cpp");
    }

    #[test]
    fn prefix_matches_at_slash_boundary() {
        let util = RepoPathBuf::from_internal_string("util");
        let util_string = RepoPathBuf::from_internal_string("util/string.h");
        let utilization = RepoPathBuf::from_internal_string("utilization");
        assert!(util_string.starts_with_prefix(&util));
        assert!(!utilization.starts_with_prefix(&util));
        assert!(util.is_ancestor_of_prefix(&util_string));
    }
}
