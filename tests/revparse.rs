//! `A~2^2 == H`, `A^^3 == F`, `A^^3^2 == J` over the sample graph (see
//! `commit_generation.rs` for the graph shape).

mod common;

use vcstore::object::Commit;
use vcstore::object::Object;
use vcstore::object::Signature;
use vcstore::Datastore;
use vcstore::HashId;
use vcstore::RevisionGraph;

fn commit(store: &Datastore, generation: u32, parents: Vec<HashId>) -> HashId {
    let c = Commit {
        tree_id: HashId::NULL,
        generation,
        parents,
        committer: Signature::default(),
        author: Signature::default(),
        message: String::new(),
        attributes: Vec::new(),
        renames_id: None,
    };
    store.put_object(&Object::Commit(c)).unwrap()
}

#[test]
fn revparse_matches_scenario() {
    let (_dir, store) = common::loose_store();

    let g = commit(&store, 1, vec![]);
    let h = commit(&store, 1, vec![]);
    let i = commit(&store, 1, vec![]);
    let j = commit(&store, 1, vec![]);
    let e = commit(&store, 1, vec![]);
    let d = commit(&store, 2, vec![g, h]);
    let f = commit(&store, 2, vec![i, j]);
    let b = commit(&store, 3, vec![d, e, f]);
    let c = commit(&store, 3, vec![f]);
    let a = commit(&store, 4, vec![b, c]);

    let graph = RevisionGraph::new(&store);

    // A~2 == D, D^2 == H
    let a_tilde_2 = graph.nth_ancestor(a, 2).unwrap().unwrap();
    assert_eq!(a_tilde_2, d);
    assert_eq!(graph.nth_parent(a_tilde_2, 2).unwrap(), Some(h));

    // A^ == B, B^3 == F
    let a_caret = graph.nth_parent(a, 1).unwrap().unwrap();
    assert_eq!(a_caret, b);
    let a_caret_caret_3 = graph.nth_parent(a_caret, 3).unwrap().unwrap();
    assert_eq!(a_caret_caret_3, f);

    // F^2 == J
    assert_eq!(graph.nth_parent(a_caret_caret_3, 2).unwrap(), Some(j));
}
