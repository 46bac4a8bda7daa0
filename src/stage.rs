//! An in-memory overlay over a base tree, used to assemble a new tree
//! without mutating the one it started from.
//!
//! Directories are materialized lazily: touching a path for the first time
//! loads just that subtree from the base and copies it into an in-memory
//! [`Directory`] node; untouched subtrees are never read. This mirrors
//! `StageArea::Directory` in `stage.cpp` — a `BTreeMap` standing in for its
//! `std::map<string, Entry, less<>>`.

use std::collections::BTreeMap;

use crate::datastore::Datastore;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::header::DataType;
use crate::object::Object;
use crate::object::PathEntry;
use crate::object::PathType;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;

/// Whether an overlay entry is untouched, newly set, or a tombstone over a
/// base-tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum Action {
    #[default]
    None,
    Add,
    Remove,
}

#[derive(Clone, Debug)]
struct Entry {
    id: HashId,
    action: Action,
    kind: PathType,
    size: u64,
    indexed: bool,
    directory: Option<Box<Directory>>,
}

impl Entry {
    fn new() -> Self {
        Entry {
            id: HashId::NULL,
            action: Action::None,
            kind: PathType::File,
            size: 0,
            indexed: false,
            directory: None,
        }
    }

    fn from_tree_entry(e: &TreeEntry) -> Self {
        Entry {
            id: e.id,
            action: Action::None,
            kind: e.kind,
            size: e.size,
            indexed: false,
            directory: None,
        }
    }

    fn as_path_entry(&self) -> PathEntry {
        PathEntry {
            id: self.id,
            kind: self.kind,
            size: self.size,
            indexed: self.indexed,
        }
    }
}

#[derive(Default)]
struct Directory {
    entries: BTreeMap<String, Entry>,
}

impl Directory {
    fn from_tree(tree: &Tree) -> Self {
        let entries = tree
            .entries()
            .map(|e| (e.name.as_str().to_owned(), Entry::from_tree_entry(e)))
            .collect();
        Directory { entries }
    }

    fn iter(&self, include_deleted: bool) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries
            .iter()
            .filter(move |(_, e)| include_deleted || e.action != Action::Remove)
    }

    fn find(&self, name: &str, include_deleted: bool) -> Option<&Entry> {
        self.entries
            .get(name)
            .filter(|e| include_deleted || e.action != Action::Remove)
    }

    /// Inserts (or resets) `name` as a fresh, empty directory and returns it.
    fn make_directory(&mut self, name: &str) -> &mut Directory {
        let entry = self.entries.entry(name.to_owned()).or_insert_with(Entry::new);
        entry.id = HashId::NULL;
        entry.indexed = false;
        entry.size = 0;
        entry.action = Action::Add;
        entry.kind = PathType::Directory;
        entry.directory = Some(Box::new(Directory::default()));
        entry.directory.as_mut().unwrap()
    }

    /// Tombstones `name` if it names a base-tree entry, else erases it
    /// outright (it was purely ephemeral). Returns whether anything changed.
    fn remove(&mut self, name: &str) -> bool {
        let Some(entry) = self.entries.get_mut(name) else {
            return false;
        };
        if entry.action == Action::Remove {
            return false;
        }
        if !entry.id.is_null() {
            entry.action = Action::Remove;
            entry.directory = None;
        } else {
            self.entries.remove(name);
        }
        true
    }

    fn upsert(&mut self, name: &str, value: PathEntry) -> bool {
        let entry = self.entries.entry(name.to_owned()).or_insert_with(Entry::new);
        entry.action = Action::Add;
        entry.id = value.id;
        entry.indexed = value.indexed;
        entry.kind = value.kind;
        entry.size = value.size;
        entry.directory = None;
        true
    }
}

fn descend_or_create<'d>(
    store: &Datastore,
    dir: &'d mut Directory,
    name: &str,
) -> StoreResult<&'d mut Directory> {
    let existing = dir.find(name, false).map(|e| (e.directory.is_some(), e.kind, e.id));
    match existing {
        Some((true, _, _)) => Ok(dir.entries.get_mut(name).unwrap().directory.as_mut().unwrap()),
        Some((false, PathType::Directory, id)) => {
            let loaded = if id.is_null() {
                Directory::default()
            } else {
                Directory::from_tree(&store.load_tree(id)?)
            };
            let entry = dir.entries.get_mut(name).unwrap();
            entry.directory = Some(Box::new(loaded));
            Ok(entry.directory.as_mut().unwrap())
        }
        // Either absent, or present as a non-directory entry that a type
        // change now overwrites into an empty directory.
        _ => Ok(dir.make_directory(name)),
    }
}

fn add_impl(store: &Datastore, dir: &mut Directory, parts: &[String], entry: PathEntry) -> StoreResult<bool> {
    if parts.len() == 1 {
        return Ok(dir.upsert(&parts[0], entry));
    }
    let next = descend_or_create(store, dir, &parts[0])?;
    add_impl(store, next, &parts[1..], entry)
}

fn remove_impl(store: &Datastore, dir: &mut Directory, parts: &[String]) -> StoreResult<bool> {
    if parts.len() == 1 {
        return Ok(dir.remove(&parts[0]));
    }
    let existing = dir
        .find(&parts[0], false)
        .map(|e| (e.directory.is_some(), e.kind, e.id));
    match existing {
        Some((true, _, _)) => {
            let next = dir.entries.get_mut(&parts[0]).unwrap().directory.as_mut().unwrap();
            remove_impl(store, next, &parts[1..])
        }
        Some((false, PathType::Directory, id)) => {
            let loaded = Directory::from_tree(&store.load_tree(id)?);
            let entry = dir.entries.get_mut(&parts[0]).unwrap();
            entry.directory = Some(Box::new(loaded));
            remove_impl(store, entry.directory.as_mut().unwrap(), &parts[1..])
        }
        _ => Ok(false),
    }
}

/// Resolves `id` (a commit or tree id) to the tree it names, following a
/// commit's `tree_id` transparently. Matches `GetTreeId` in `stage.cpp`.
pub fn resolve_tree_id(store: &Datastore, id: HashId) -> StoreResult<HashId> {
    match store.get_meta(id, true)?.map(|m| m.ty()) {
        Some(DataType::Tree) => Ok(id),
        _ => Ok(store.load_commit(id)?.tree_id),
    }
}

/// An overlay over a base tree id (or no base, for building a tree from
/// scratch), supporting path-addressed mutation and deterministic
/// re-serialization.
pub struct StageArea<'a> {
    store: &'a Datastore,
    tree_id: HashId,
    stage_root: Option<Directory>,
    copies: BTreeMap<RepoPathBuf, RepoPathBuf>,
}

impl<'a> StageArea<'a> {
    /// Starts from an explicit tree id (or `None`/null for an empty base).
    /// `tree_id`, if given, must already name a `Tree` object — use
    /// [`resolve_tree_id`] first if it might be a commit id.
    pub fn new(store: &'a Datastore, tree_id: Option<HashId>) -> Self {
        StageArea {
            store,
            tree_id: tree_id.unwrap_or(HashId::NULL),
            stage_root: None,
            copies: BTreeMap::new(),
        }
    }

    /// Starts from a commit or tree id, resolving it to the root tree first.
    pub fn from_commit_or_tree(store: &'a Datastore, id: Option<HashId>) -> StoreResult<Self> {
        let tree_id = match id {
            Some(id) if !id.is_null() => Some(resolve_tree_id(store, id)?),
            _ => None,
        };
        Ok(StageArea::new(store, tree_id))
    }

    fn mutable_root(&mut self) -> StoreResult<&mut Directory> {
        if self.stage_root.is_none() {
            let dir = if self.tree_id.is_null() {
                Directory::default()
            } else {
                Directory::from_tree(&self.store.load_tree(self.tree_id)?)
            };
            self.stage_root = Some(dir);
        }
        Ok(self.stage_root.as_mut().unwrap())
    }

    pub fn add(&mut self, path: &RepoPathBuf, entry: PathEntry) -> StoreResult<bool> {
        if path.is_root() {
            return Err(StoreError::InvalidArgument("cannot add at the tree root".into()));
        }
        let parts: Vec<String> = path.components().map(String::from).collect();
        let store = self.store;
        let root = self.mutable_root()?;
        add_impl(store, root, &parts, entry)
    }

    pub fn remove(&mut self, path: &RepoPathBuf) -> StoreResult<bool> {
        if path.is_root() {
            return Err(StoreError::InvalidArgument("cannot remove the tree root".into()));
        }
        let parts: Vec<String> = path.components().map(String::from).collect();
        let store = self.store;
        let root = self.mutable_root()?;
        let removed = remove_impl(store, root, &parts)?;
        if removed {
            self.copies.remove(path);
        }
        Ok(removed)
    }

    /// Reads `src`'s entry from the *base* tree (not the overlay) and adds
    /// it at `dst`, recording copy provenance for the eventual `Renames`
    /// object.
    pub fn copy(&mut self, src: &RepoPathBuf, dst: &RepoPathBuf) -> StoreResult<bool> {
        let src_parts: Vec<String> = src.components().map(String::from).collect();
        let Some(entry) = self.get_path_entry(self.tree_id, &src_parts)? else {
            return Ok(false);
        };
        let added = self.add(dst, entry)?;
        if added {
            self.copies.insert(dst.clone(), src.clone());
        }
        Ok(added)
    }

    pub fn get_entry(&self, path: &RepoPathBuf, include_deleted: bool) -> StoreResult<Option<PathEntry>> {
        let parts: Vec<String> = path.components().map(String::from).collect();

        if parts.is_empty() || self.stage_root.is_none() {
            return if self.tree_id.is_null() {
                Ok(Some(PathEntry::new(HashId::NULL, PathType::Directory, 0)))
            } else {
                self.get_path_entry(self.tree_id, &parts)
            };
        }

        let mut cur = self.stage_root.as_ref().unwrap();
        for (i, part) in parts.iter().enumerate() {
            let Some(e) = cur.find(part, include_deleted) else {
                break;
            };
            if i + 1 == parts.len() {
                return Ok(Some(e.as_path_entry()));
            } else if let Some(d) = &e.directory {
                cur = d;
            } else if e.kind == PathType::Directory {
                return self.get_path_entry(e.id, &parts[i + 1..]);
            } else {
                break;
            }
        }
        Ok(None)
    }

    pub fn list_tree(
        &self,
        path: &RepoPathBuf,
        include_deleted: bool,
    ) -> StoreResult<Vec<(String, PathEntry)>> {
        let parts: Vec<String> = path.components().map(String::from).collect();

        if parts.is_empty() {
            if let Some(root) = &self.stage_root {
                return Ok(self.list_directory_entries(root, include_deleted));
            }
        }
        if self.stage_root.is_none() {
            return self.list_tree_entries(self.tree_id, &parts);
        }

        let mut cur = self.stage_root.as_ref().unwrap();
        for (i, part) in parts.iter().enumerate() {
            let Some(e) = cur.find(part, include_deleted) else {
                break;
            };
            if i + 1 == parts.len() {
                if let Some(d) = &e.directory {
                    return Ok(self.list_directory_entries(d, include_deleted));
                } else if e.kind == PathType::Directory {
                    return self.list_tree_entries(e.id, &[]);
                }
                return Ok(Vec::new());
            } else if let Some(d) = &e.directory {
                cur = d;
            } else if e.kind == PathType::Directory {
                return self.list_tree_entries(e.id, &parts[i + 1..]);
            } else {
                break;
            }
        }
        Ok(Vec::new())
    }

    fn list_directory_entries(&self, dir: &Directory, include_deleted: bool) -> Vec<(String, PathEntry)> {
        dir.iter(include_deleted)
            .map(|(name, e)| (name.clone(), e.as_path_entry()))
            .collect()
    }

    fn list_tree_entries(&self, id: HashId, parts: &[String]) -> StoreResult<Vec<(String, PathEntry)>> {
        let Some(entry) = self.get_path_entry(id, parts)? else {
            return Ok(Vec::new());
        };
        if entry.kind != PathType::Directory {
            return Ok(Vec::new());
        }
        let tree = self.store.load_tree(entry.id)?;
        Ok(tree
            .entries()
            .map(|e| (e.name.as_str().to_owned(), PathEntry::new(e.id, e.kind, e.size)))
            .collect())
    }

    fn get_path_entry(&self, id: HashId, parts: &[String]) -> StoreResult<Option<PathEntry>> {
        if id.is_null() {
            return Ok(None);
        }
        if parts.is_empty() {
            return Ok(Some(PathEntry::new(id, PathType::Directory, 0)));
        }
        let mut tree = self.store.load_tree(id)?;
        for (i, part) in parts.iter().enumerate() {
            let Some(found) = tree.find(part).cloned() else {
                break;
            };
            if i + 1 == parts.len() {
                return Ok(Some(PathEntry::new(found.id, found.kind, found.size)));
            } else if found.kind == PathType::Directory {
                tree = self.store.load_tree(found.id)?;
            } else {
                break;
            }
        }
        Ok(None)
    }

    /// Recursive copy provenance recorded by [`StageArea::copy`]; maps
    /// destination path to source path (the source commit is always left
    /// unresolved here, matching `copies_`'s `{id=HashId(), path=src}`).
    pub fn copies(&self) -> &BTreeMap<RepoPathBuf, RepoPathBuf> {
        &self.copies
    }

    /// Serializes the overlay (or, if untouched, the original base tree)
    /// into a new tree, returning its id. Always returns a valid tree id,
    /// creating an empty tree object if the result would otherwise be null.
    pub fn save_tree(&self, keep_empty_dirs: bool) -> StoreResult<HashId> {
        let id = match &self.stage_root {
            Some(root) => self.save_tree_impl(root, keep_empty_dirs)?.unwrap_or(HashId::NULL),
            None => self.tree_id,
        };
        if !id.is_null() {
            Ok(id)
        } else {
            self.store.put_object(&Object::Tree(Tree::empty()))
        }
    }

    /// Returns `None` when `dir` serializes to an empty tree and
    /// `keep_empty_dirs` is false, signaling the caller to omit this
    /// subtree's entry entirely.
    fn save_tree_impl(&self, dir: &Directory, keep_empty_dirs: bool) -> StoreResult<Option<HashId>> {
        let mut entries = Vec::new();
        for (name, e) in dir.iter(false) {
            let (id, kind, size) = if let Some(sub) = &e.directory {
                match self.save_tree_impl(sub, keep_empty_dirs)? {
                    Some(id) => (id, PathType::Directory, 0),
                    None => continue,
                }
            } else if e.kind == PathType::Directory && e.id.is_null() {
                if !keep_empty_dirs {
                    continue;
                }
                let empty_id = self.store.put_object(&Object::Tree(Tree::empty()))?;
                (empty_id, PathType::Directory, 0)
            } else {
                (e.id, e.kind, e.size)
            };
            entries.push(TreeEntry {
                name: RepoPathComponentBuf::new(name.clone())?,
                id,
                kind,
                size,
            });
        }

        if entries.is_empty() && !keep_empty_dirs {
            return Ok(None);
        }

        let tree = Tree::from_sorted_entries(entries)?;
        Ok(Some(self.store.put_object(&Object::Tree(tree))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Datastore) {
        let dir = tempfile::tempdir().unwrap();
        let loose = Arc::new(crate::loose::LooseBackend::new(dir.path()).unwrap());
        (dir, Datastore::new(vec![loose]))
    }

    fn rp(s: &str) -> RepoPathBuf {
        RepoPathBuf::from_internal_string(s)
    }

    fn blob_entry(store: &Datastore, content: &[u8]) -> PathEntry {
        let (id, _) = store.put(DataType::Blob, content).unwrap();
        PathEntry::new(id, PathType::File, content.len() as u64)
    }

    #[test]
    fn add_and_get_entry_round_trips() {
        let (_dir, store) = store();
        let mut stage = StageArea::new(&store, None);
        let entry = blob_entry(&store, b"hello");
        assert!(stage.add(&rp("a/b/c.txt"), entry.clone()).unwrap());
        let found = stage.get_entry(&rp("a/b/c.txt"), false).unwrap().unwrap();
        assert_eq!(found.id, entry.id);
        assert_eq!(found.size, entry.size);
    }

    #[test]
    fn remove_on_ephemeral_entry_erases_it() {
        let (_dir, store) = store();
        let mut stage = StageArea::new(&store, None);
        let entry = blob_entry(&store, b"hi");
        stage.add(&rp("x.txt"), entry).unwrap();
        assert!(stage.remove(&rp("x.txt")).unwrap());
        assert!(stage.get_entry(&rp("x.txt"), false).unwrap().is_none());
        assert!(stage.get_entry(&rp("x.txt"), true).unwrap().is_none());
    }

    #[test]
    fn remove_on_base_entry_tombstones_unless_include_deleted() {
        let (_dir, store) = store();
        let base_entry = blob_entry(&store, b"base content");
        let tree = Tree::from_entries(vec![TreeEntry {
            name: RepoPathComponentBuf::new("kept.txt").unwrap(),
            id: base_entry.id,
            kind: PathType::File,
            size: base_entry.size,
        }])
        .unwrap();
        let base_id = store.put_object(&Object::Tree(tree)).unwrap();

        let mut stage = StageArea::new(&store, Some(base_id));
        assert!(stage.remove(&rp("kept.txt")).unwrap());
        assert!(stage.get_entry(&rp("kept.txt"), false).unwrap().is_none());
        assert!(stage.get_entry(&rp("kept.txt"), true).unwrap().is_some());
    }

    #[test]
    fn save_tree_is_idempotent_without_mutation() {
        let (_dir, store) = store();
        let base_entry = blob_entry(&store, b"unchanged");
        let tree = Tree::from_entries(vec![TreeEntry {
            name: RepoPathComponentBuf::new("f.txt").unwrap(),
            id: base_entry.id,
            kind: PathType::File,
            size: base_entry.size,
        }])
        .unwrap();
        let base_id = store.put_object(&Object::Tree(tree)).unwrap();

        let stage = StageArea::new(&store, Some(base_id));
        assert_eq!(stage.save_tree(false).unwrap(), base_id);
    }

    #[test]
    fn copy_reads_from_base_and_records_provenance() {
        let (_dir, store) = store();
        let base_entry = blob_entry(&store, b"original");
        let tree = Tree::from_entries(vec![TreeEntry {
            name: RepoPathComponentBuf::new("src.txt").unwrap(),
            id: base_entry.id,
            kind: PathType::File,
            size: base_entry.size,
        }])
        .unwrap();
        let base_id = store.put_object(&Object::Tree(tree)).unwrap();

        let mut stage = StageArea::new(&store, Some(base_id));
        assert!(stage.copy(&rp("src.txt"), &rp("dst.txt")).unwrap());
        let dst_entry = stage.get_entry(&rp("dst.txt"), false).unwrap().unwrap();
        assert_eq!(dst_entry.id, base_entry.id);
        assert_eq!(stage.copies().get(&rp("dst.txt")), Some(&rp("src.txt")));
    }

    #[test]
    fn empty_subtrees_are_skipped_unless_kept() {
        let (_dir, store) = store();
        let mut stage = StageArea::new(&store, None);
        let entry = blob_entry(&store, b"leaf");
        stage.add(&rp("dir/file.txt"), entry).unwrap();
        stage.remove(&rp("dir/file.txt")).unwrap();

        let id_dropped = stage.save_tree(false).unwrap();
        let tree_dropped = store.load_tree(id_dropped).unwrap();
        assert!(tree_dropped.is_empty());

        let id_kept = stage.save_tree(true).unwrap();
        let tree_kept = store.load_tree(id_kept).unwrap();
        assert_eq!(tree_kept.len(), 1);
    }
}
