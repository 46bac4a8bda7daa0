//! Builds the sample graph from the generation/revparse scenarios:
//!
//! ```text
//! A -> {B, C}
//! B -> {D, E, F}
//! C -> {F}
//! D -> {G, H}
//! F -> {I, J}
//! ```
//!
//! with `G, H, I, J, E` as roots.

mod common;

use std::collections::HashMap;

use vcstore::object::Commit;
use vcstore::object::Object;
use vcstore::object::Signature;
use vcstore::Datastore;
use vcstore::HashId;

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

fn generation_of(parents: &[u32]) -> u32 {
    1 + parents.iter().copied().max().unwrap_or(0)
}

#[test]
fn sample_graph_generations_match_longest_path_plus_one() {
    let (_dir, store) = common::loose_store();

    let mut gen: HashMap<&str, u32> = HashMap::new();
    let mut id: HashMap<&str, HashId> = HashMap::new();

    for leaf in ["G", "H", "I", "J", "E"] {
        gen.insert(leaf, generation_of(&[]));
        id.insert(leaf, commit(&store, gen[leaf], vec![]));
    }

    gen.insert("D", generation_of(&[gen["G"], gen["H"]]));
    id.insert("D", commit(&store, gen["D"], vec![id["G"], id["H"]]));

    gen.insert("F", generation_of(&[gen["I"], gen["J"]]));
    id.insert("F", commit(&store, gen["F"], vec![id["I"], id["J"]]));

    gen.insert("B", generation_of(&[gen["D"], gen["E"], gen["F"]]));
    id.insert("B", commit(&store, gen["B"], vec![id["D"], id["E"], id["F"]]));

    gen.insert("C", generation_of(&[gen["F"]]));
    id.insert("C", commit(&store, gen["C"], vec![id["F"]]));

    gen.insert("A", generation_of(&[gen["B"], gen["C"]]));
    id.insert("A", commit(&store, gen["A"], vec![id["B"], id["C"]]));

    for leaf in ["G", "H", "I", "J", "E"] {
        assert_eq!(gen[leaf], 1, "{leaf} should be generation 1");
    }
    assert_eq!(gen["D"], 2);
    assert_eq!(gen["F"], 2);
    assert_eq!(gen["B"], 3);
    assert_eq!(gen["C"], 3);
    assert_eq!(gen["A"], 4);

    for name in ["A", "B", "C", "D", "F"] {
        let loaded = store.load_commit(id[name]).unwrap();
        assert_eq!(loaded.generation, gen[name]);
    }
}
