//! Diffing `{bin/main.cpp, lib/test.h}` against
//! `{lib/test.h (modified), util/string.h}` yields, in order:
//! `Delete bin`, `Delete bin/main.cpp`, `Change lib/test.h`,
//! `Add util`, `Add util/string.h`.

mod common;

use vcstore::changelist::collect_changes;
use vcstore::changelist::PathAction;
use vcstore::object::Object;
use vcstore::object::Tree;
use vcstore::object::TreeEntry;
use vcstore::repo_path::RepoPathComponentBuf;
use vcstore::DataType;
use vcstore::PathType;

#[test]
fn change_list_matches_scenario_order() {
    let (_dir, store) = common::loose_store();

    let (main_cpp, _) = store.put(DataType::Blob, b"int main() {}").unwrap();
    let (test_h_old, _) = store.put(DataType::Blob, b"old header").unwrap();
    let (test_h_new, _) = store.put(DataType::Blob, b"new header").unwrap();
    let (string_h, _) = store.put(DataType::Blob, b"std::string helpers").unwrap();

    let bin_tree = Tree::from_entries(vec![TreeEntry {
        name: RepoPathComponentBuf::new("main.cpp").unwrap(),
        id: main_cpp,
        kind: PathType::File,
        size: 13,
    }])
    .unwrap();
    let bin_id = store.put_object(&Object::Tree(bin_tree)).unwrap();

    let lib_tree_old = Tree::from_entries(vec![TreeEntry {
        name: RepoPathComponentBuf::new("test.h").unwrap(),
        id: test_h_old,
        kind: PathType::File,
        size: 10,
    }])
    .unwrap();
    let lib_id_old = store.put_object(&Object::Tree(lib_tree_old)).unwrap();

    let lib_tree_new = Tree::from_entries(vec![TreeEntry {
        name: RepoPathComponentBuf::new("test.h").unwrap(),
        id: test_h_new,
        kind: PathType::File,
        size: 10,
    }])
    .unwrap();
    let lib_id_new = store.put_object(&Object::Tree(lib_tree_new)).unwrap();

    let util_tree = Tree::from_entries(vec![TreeEntry {
        name: RepoPathComponentBuf::new("string.h").unwrap(),
        id: string_h,
        kind: PathType::File,
        size: 20,
    }])
    .unwrap();
    let util_id = store.put_object(&Object::Tree(util_tree)).unwrap();

    let from_tree = Tree::from_entries(vec![
        TreeEntry {
            name: RepoPathComponentBuf::new("bin").unwrap(),
            id: bin_id,
            kind: PathType::Directory,
            size: 0,
        },
        TreeEntry {
            name: RepoPathComponentBuf::new("lib").unwrap(),
            id: lib_id_old,
            kind: PathType::Directory,
            size: 0,
        },
    ])
    .unwrap();
    let from_id = store.put_object(&Object::Tree(from_tree)).unwrap();

    let to_tree = Tree::from_entries(vec![
        TreeEntry {
            name: RepoPathComponentBuf::new("lib").unwrap(),
            id: lib_id_new,
            kind: PathType::Directory,
            size: 0,
        },
        TreeEntry {
            name: RepoPathComponentBuf::new("util").unwrap(),
            id: util_id,
            kind: PathType::Directory,
            size: 0,
        },
    ])
    .unwrap();
    let to_id = store.put_object(&Object::Tree(to_tree)).unwrap();

    let changes = collect_changes(&store, from_id, to_id).unwrap();
    let got: Vec<(PathAction, String)> = changes
        .iter()
        .map(|c| (c.action, c.path.as_str().to_owned()))
        .collect();

    assert_eq!(
        got,
        vec![
            (PathAction::Delete, "bin".to_owned()),
            (PathAction::Delete, "bin/main.cpp".to_owned()),
            (PathAction::Change, "lib/test.h".to_owned()),
            (PathAction::Add, "util".to_owned()),
            (PathAction::Add, "util/string.h".to_owned()),
        ]
    );
}
