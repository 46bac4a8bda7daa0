mod common;

use std::sync::Arc;

use vcstore::DataType;
use vcstore::Datastore;
use vcstore::LooseBackend;

#[test]
fn chunked_blob_resolves_transparently() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(LooseBackend::new(dir.path()).unwrap());
    let store = Datastore::new(vec![backend]).with_chunk_size(512);

    let content: Vec<u8> = (0..8703u32).map(|i| (i % 251) as u8).collect();
    let (id, ty) = store.put(DataType::Blob, &content).unwrap();
    assert_eq!(ty, DataType::Index);

    assert_eq!(store.get_meta(id, false).unwrap().unwrap().ty(), DataType::Index);
    assert_eq!(store.get_meta(id, true).unwrap().unwrap().ty(), DataType::Blob);

    let loaded = store.load_blob(id).unwrap();
    assert_eq!(loaded.len(), 8703);
    assert_eq!(&*loaded, content.as_slice());

    let index = store.load_index(id).unwrap();
    assert!(index.parts().len() > 1);
    assert_eq!(index.size(), 8703);
}
