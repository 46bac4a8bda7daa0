mod common;

use vcstore::DataHeader;
use vcstore::DataType;
use vcstore::HashId;

#[test]
fn round_trip_blob() {
    let (_dir, store) = common::loose_store();
    let content = b"int main() { return 0; }";

    let (id, ty) = store.put(DataType::Blob, content).unwrap();
    assert_eq!(ty, DataType::Blob);

    let header = DataHeader::new(DataType::Blob, content.len() as u64).unwrap();
    let expected = HashId::digest(&header.to_bytes(), content);
    assert_eq!(id, expected);

    assert_eq!(&*store.load_blob(id).unwrap(), content);
    assert_eq!(store.get_meta(id, false).unwrap().unwrap().ty(), DataType::Blob);
}
