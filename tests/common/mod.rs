use std::sync::Arc;

use vcstore::Datastore;
use vcstore::LooseBackend;

/// A `Datastore` backed by a single loose backend in a fresh temp directory.
/// The `TempDir` must be kept alive for as long as the store is used.
#[allow(dead_code)]
pub fn loose_store() -> (tempfile::TempDir, Datastore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(LooseBackend::new(dir.path()).expect("loose backend"));
    (dir, Datastore::new(vec![backend]))
}
