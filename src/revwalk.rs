//! A cached, generation-ordered view of the commit DAG.
//!
//! [`RevisionGraph`] lazily loads commits into a slab as they're first
//! touched, keyed by a [`HashMap<HashId, SlabIndex>`] the way
//! `default_index/entry.rs` indexes a pre-built commit index — except this
//! slab grows on demand rather than being built up front. [`Walker`] then
//! traverses that cache: a linear fast path for the common single-root,
//! first-parent case, and a generation-ordered max-heap for everything else.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::datastore::Datastore;
use crate::error::StoreResult;
use crate::hash::HashId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlabIndex(u32);

/// A commit's walk-relevant fields, cached after first load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionRecord {
    pub id: HashId,
    pub generation: u32,
    pub timestamp: i64,
    pub tree_id: HashId,
    pub parents: Vec<HashId>,
}

/// A shared handle to a cached commit record.
pub type Revision = Arc<RevisionRecord>;

#[derive(Default)]
struct Cache {
    records: Vec<Revision>,
    index: HashMap<HashId, SlabIndex>,
}

/// Lazily-populated cache over a [`Datastore`]'s commits, shared by every
/// [`Walker`] built from it.
pub struct RevisionGraph<'a> {
    store: &'a Datastore,
    cache: Mutex<Cache>,
}

impl<'a> RevisionGraph<'a> {
    pub fn new(store: &'a Datastore) -> Self {
        RevisionGraph {
            store,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Returns the cached record for `id`, loading and caching it on first
    /// touch.
    pub fn get_revision(&self, id: HashId) -> StoreResult<Revision> {
        if let Some(rev) = self.cached(id) {
            return Ok(rev);
        }
        let commit = self.store.load_commit(id)?;
        let record = Arc::new(RevisionRecord {
            id,
            generation: commit.generation,
            timestamp: commit.timestamp(),
            tree_id: commit.tree_id,
            parents: commit.parents,
        });

        let mut cache = self.cache.lock().unwrap();
        // Another lookup may have populated this id while we were loading.
        if let Some(&idx) = cache.index.get(&id) {
            return Ok(cache.records[idx.0 as usize].clone());
        }
        let idx = SlabIndex(cache.records.len() as u32);
        cache.records.push(record.clone());
        cache.index.insert(id, idx);
        Ok(record)
    }

    fn cached(&self, id: HashId) -> Option<Revision> {
        let cache = self.cache.lock().unwrap();
        cache.index.get(&id).map(|&idx| cache.records[idx.0 as usize].clone())
    }

    pub fn walker(&self) -> Walker<'_, 'a> {
        Walker::new(self)
    }

    /// `rev^n`: the `n`-th parent of `id`, 1-indexed (`n == 0` returns `id`
    /// itself). `None` if `id` has fewer than `n` parents.
    pub fn nth_parent(&self, id: HashId, n: usize) -> StoreResult<Option<HashId>> {
        if n == 0 {
            return Ok(Some(id));
        }
        let rev = self.get_revision(id)?;
        Ok(rev.parents.get(n - 1).copied())
    }

    /// `rev~n`: the `n`-th generation first-parent ancestor of `id` (`n ==
    /// 0` returns `id` itself).
    pub fn nth_ancestor(&self, id: HashId, n: usize) -> StoreResult<Option<HashId>> {
        let mut current = id;
        for _ in 0..n {
            let rev = self.get_revision(current)?;
            match rev.parents.first() {
                Some(&parent) => current = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

/// What a walk callback asks the walker to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    Hide,
    Stop,
}

struct HeapItem(Revision);

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.0.generation == other.0.generation && self.0.id == other.0.id
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    /// Generation descending, so the heap is naturally max-first without a
    /// `Reverse` wrapper; ties broken by id for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.generation.cmp(&other.0.generation).then_with(|| self.0.id.cmp(&other.0.id))
    }
}

/// A configured traversal over a [`RevisionGraph`].
pub struct Walker<'g, 'a> {
    graph: &'g RevisionGraph<'a>,
    roots: HashSet<HashId>,
    hidden: HashSet<HashId>,
    generation_from: u32,
    generation_to: u32,
    first_parent: bool,
}

impl<'g, 'a> Walker<'g, 'a> {
    fn new(graph: &'g RevisionGraph<'a>) -> Self {
        Walker {
            graph,
            roots: HashSet::new(),
            hidden: HashSet::new(),
            generation_from: 0,
            generation_to: u32::MAX,
            first_parent: false,
        }
    }

    pub fn generation_from(mut self, generation: u32) -> Self {
        self.generation_from = generation;
        self
    }

    pub fn generation_to(mut self, generation: u32) -> Self {
        self.generation_to = generation;
        self
    }

    pub fn push(mut self, id: HashId) -> Self {
        self.roots.insert(id);
        self
    }

    pub fn push_all(mut self, ids: impl IntoIterator<Item = HashId>) -> Self {
        self.roots.extend(ids);
        self
    }

    pub fn hide(mut self, id: HashId) -> Self {
        self.hidden.insert(id);
        self
    }

    pub fn hide_all(mut self, ids: impl IntoIterator<Item = HashId>) -> Self {
        self.hidden.extend(ids);
        self
    }

    pub fn simplify_first_parent(mut self, value: bool) -> Self {
        self.first_parent = value;
        self
    }

    /// Runs the walk, delivering each commit within range to `cb` in an
    /// order where children never follow their ancestors.
    pub fn walk(&self, mut cb: impl FnMut(&RevisionRecord) -> WalkAction) -> StoreResult<()> {
        if self.roots.is_empty() {
            return Ok(());
        }
        if self.first_parent && self.roots.len() == 1 && self.hidden.is_empty() {
            self.walk_linear(&mut cb)
        } else {
            self.walk_generic(&mut cb)
        }
    }

    fn walk_linear(&self, cb: &mut dyn FnMut(&RevisionRecord) -> WalkAction) -> StoreResult<()> {
        let mut id = *self.roots.iter().next().expect("checked non-empty by walk()");
        loop {
            let rev = self.graph.get_revision(id)?;
            if rev.generation < self.generation_from {
                break;
            }
            if rev.generation <= self.generation_to {
                match cb(&rev) {
                    WalkAction::Continue => {}
                    WalkAction::Hide | WalkAction::Stop => return Ok(()),
                }
            }
            match rev.parents.first() {
                Some(&parent) => id = parent,
                None => break,
            }
        }
        Ok(())
    }

    fn walk_generic(&self, cb: &mut dyn FnMut(&RevisionRecord) -> WalkAction) -> StoreResult<()> {
        let mut hidden: HashSet<HashId> = self.hidden.clone();
        let mut marked: HashSet<HashId> = HashSet::new();
        let mut queue: BinaryHeap<HeapItem> = BinaryHeap::new();
        let mut hidden_in_queue = hidden.len();

        for &id in &self.hidden {
            marked.insert(id);
            queue.push(HeapItem(self.graph.get_revision(id)?));
        }
        for &id in &self.roots {
            if marked.insert(id) {
                queue.push(HeapItem(self.graph.get_revision(id)?));
            }
        }

        while !queue.is_empty() && hidden_in_queue < queue.len() {
            let commit = queue.pop().unwrap().0;
            let id = commit.id;

            if commit.generation < self.generation_from {
                continue;
            }

            let mut hide = false;
            if hidden.contains(&id) {
                hidden_in_queue -= 1;
                hide = true;
            } else if commit.generation <= self.generation_to {
                match cb(&commit) {
                    WalkAction::Continue => {}
                    WalkAction::Hide => hide = true,
                    WalkAction::Stop => return Ok(()),
                }
            }

            let limit = if self.first_parent { 1 } else { commit.parents.len() };
            for &parent in commit.parents.iter().take(limit) {
                if hide && hidden.insert(parent) {
                    hidden_in_queue += 1;
                }
                if marked.insert(parent) {
                    queue.push(HeapItem(self.graph.get_revision(parent)?));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Commit;
    use crate::object::Object;
    use crate::object::Signature;
    use std::sync::Arc as StdArc;

    fn store() -> (tempfile::TempDir, Datastore) {
        let dir = tempfile::tempdir().unwrap();
        let loose = StdArc::new(crate::loose::LooseBackend::new(dir.path()).unwrap());
        (dir, Datastore::new(vec![loose]))
    }

    fn commit(store: &Datastore, generation: u32, parents: Vec<HashId>) -> HashId {
        let c = Commit {
            tree_id: HashId::NULL,
            generation,
            parents,
            committer: Signature {
                id: "a".into(),
                name: "a".into(),
                when: generation as i64,
            },
            author: Signature::default(),
            message: format!("commit {generation}"),
            attributes: Vec::new(),
            renames_id: None,
        };
        store.put_object(&Object::Commit(c)).unwrap()
    }

    /// root -> a -> b -> c (linear chain), generations 0..=3.
    fn linear_chain(store: &Datastore) -> Vec<HashId> {
        let root = commit(store, 0, vec![]);
        let a = commit(store, 1, vec![root]);
        let b = commit(store, 2, vec![a]);
        let c = commit(store, 3, vec![b]);
        vec![root, a, b, c]
    }

    #[test]
    fn linear_walk_visits_in_descending_generation() {
        let (_dir, store) = store();
        let chain = linear_chain(&store);
        let graph = RevisionGraph::new(&store);
        let mut seen = Vec::new();
        graph
            .walker()
            .push(*chain.last().unwrap())
            .simplify_first_parent(true)
            .walk(|rev| {
                seen.push(rev.id);
                WalkAction::Continue
            })
            .unwrap();
        assert_eq!(seen, vec![chain[3], chain[2], chain[1], chain[0]]);
    }

    #[test]
    fn generic_walk_merges_two_branches_without_duplicates() {
        let (_dir, store) = store();
        let root = commit(&store, 0, vec![]);
        let left = commit(&store, 1, vec![root]);
        let right = commit(&store, 1, vec![root]);
        let merge = commit(&store, 2, vec![left, right]);

        let graph = RevisionGraph::new(&store);
        let mut seen = Vec::new();
        graph
            .walker()
            .push(merge)
            .walk(|rev| {
                seen.push(rev.id);
                WalkAction::Continue
            })
            .unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], merge);
        assert!(seen.contains(&root));
        // root must be last: it is the common ancestor of everything else.
        assert_eq!(*seen.last().unwrap(), root);
    }

    #[test]
    fn hide_excludes_ancestors_of_hidden_commit() {
        let (_dir, store) = store();
        let chain = linear_chain(&store);
        let graph = RevisionGraph::new(&store);
        let mut seen = Vec::new();
        graph
            .walker()
            .push(chain[3])
            .hide(chain[1])
            .walk(|rev| {
                seen.push(rev.id);
                WalkAction::Continue
            })
            .unwrap();
        assert_eq!(seen, vec![chain[3], chain[2]]);
    }

    #[test]
    fn generation_range_filters_delivery_but_not_traversal() {
        let (_dir, store) = store();
        let chain = linear_chain(&store);
        let graph = RevisionGraph::new(&store);
        let mut seen = Vec::new();
        graph
            .walker()
            .push(chain[3])
            .generation_from(1)
            .generation_to(2)
            .walk(|rev| {
                seen.push(rev.generation);
                WalkAction::Continue
            })
            .unwrap();
        assert_eq!(seen, vec![2, 1]);
    }

    #[test]
    fn stop_halts_walk_immediately() {
        let (_dir, store) = store();
        let chain = linear_chain(&store);
        let graph = RevisionGraph::new(&store);
        let mut seen = Vec::new();
        graph
            .walker()
            .push(chain[3])
            .walk(|rev| {
                seen.push(rev.id);
                if rev.id == chain[2] {
                    WalkAction::Stop
                } else {
                    WalkAction::Continue
                }
            })
            .unwrap();
        assert_eq!(seen, vec![chain[3], chain[2]]);
    }

    #[test]
    fn revparse_helpers_follow_parents() {
        let (_dir, store) = store();
        let chain = linear_chain(&store);
        let graph = RevisionGraph::new(&store);
        assert_eq!(graph.nth_parent(chain[3], 1).unwrap(), Some(chain[2]));
        assert_eq!(graph.nth_parent(chain[0], 1).unwrap(), None);
        assert_eq!(graph.nth_ancestor(chain[3], 3).unwrap(), Some(chain[0]));
        assert_eq!(graph.nth_ancestor(chain[3], 4).unwrap(), None);
    }
}
