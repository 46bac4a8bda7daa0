//! The chained backend façade: applications talk to a [`Datastore`],
//! not to individual [`Backend`]s directly.
//!
//! A `Datastore` orders its backends local-first. `load` tries each in turn
//! and, on an upstream hit while `cache` is enabled, writes the found object
//! back into the first (local) backend. `put` fans out to every backend in
//! the chain. Content larger than `chunk_size` is split into blobs and
//! recorded behind an `Index` object; every typed load transparently
//! reassembles it.

use std::sync::Arc;

use crate::backend::Backend;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::hash::HashId;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::object::Buffer;
use crate::object::Commit;
use crate::object::IndexObject;
use crate::object::IndexPart;
use crate::object::Object;
use crate::object::Renames;
use crate::object::Tree;
use crate::serialize;

/// Content larger than this is chunked into `Blob` parts behind an `Index`.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// A chain of storage tiers, ordered local-first.
#[derive(Debug)]
pub struct Datastore {
    backends: Vec<Arc<dyn Backend>>,
    chunk_size: u64,
    /// When true, an upstream `load` hit is written back into the first
    /// (local) backend.
    cache_on_read: bool,
}

impl Datastore {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Datastore {
            backends,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_on_read: true,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_cache_on_read(mut self, cache_on_read: bool) -> Self {
        self.cache_on_read = cache_on_read;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns the header for `id` without resolving an `Index` indirection,
    /// or `None` if no backend has it. When `resolve` is set, an `Index`
    /// header is replaced by the header of the object it reconstructs to.
    pub fn get_meta(&self, id: HashId, resolve: bool) -> StoreResult<Option<DataHeader>> {
        for backend in &self.backends {
            if let Some(meta) = backend.get_meta(id)? {
                if resolve && meta.ty() == DataType::Index {
                    let index = self.load_index(id)?;
                    return Ok(Some(DataHeader::new(index.ty(), index.size())?));
                }
                return Ok(Some(meta));
            }
        }
        Ok(None)
    }

    pub fn exists(&self, id: HashId) -> StoreResult<bool> {
        for backend in &self.backends {
            if backend.exists(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Loads the object at `id`, checking each backend in order.
    pub fn load(&self, id: HashId, expected: Option<DataType>) -> StoreResult<Option<Object>> {
        for (idx, backend) in self.backends.iter().enumerate() {
            let Some((ty, bytes)) = backend.load(id, expected)? else {
                continue;
            };
            if idx > 0 && self.cache_on_read {
                if let Some(local) = self.backends.first() {
                    tracing::debug!(%id, source = backend.name(), "populating local backend from upstream hit");
                    if let Err(err) = local.put(id, ty, &bytes) {
                        tracing::warn!(%id, %err, "failed to populate local backend on cache-on-read");
                    }
                }
            }
            return Ok(Some(Object::load(ty, bytes)?));
        }
        Ok(None)
    }

    fn load_typed(&self, id: HashId, expected: DataType) -> StoreResult<Object> {
        self.load(id, Some(expected))?
            .ok_or(StoreError::NotFound(id))
    }

    /// Reconstructs the original content for `id`, following an `Index`
    /// indirection when present.
    pub fn load_blob(&self, id: HashId) -> StoreResult<Buffer> {
        let object = self.load_typed(id, DataType::Blob)?;
        match object {
            Object::Blob(bytes) => Ok(bytes),
            Object::Index(index) => {
                let bytes = self.reassemble(&index)?;
                match Object::load(DataType::Blob, bytes)? {
                    Object::Blob(bytes) => Ok(bytes),
                    _ => unreachable!("decode_object(Blob, _) always yields Object::Blob"),
                }
            }
            other => Err(StoreError::TypeMismatch {
                id,
                expected: "Blob".into(),
                found: format!("{:?}", other.data_type()),
            }),
        }
    }

    pub fn load_commit(&self, id: HashId) -> StoreResult<Commit> {
        let object = self.load_typed(id, DataType::Commit)?;
        match object {
            Object::Commit(commit) => Ok(commit),
            Object::Index(index) => {
                let bytes = self.reassemble(&index)?;
                match serialize::decode_object(DataType::Commit, bytes)? {
                    Object::Commit(commit) => Ok(commit),
                    _ => unreachable!("decode_object(Commit, _) always yields Object::Commit"),
                }
            }
            other => Err(StoreError::TypeMismatch {
                id,
                expected: "Commit".into(),
                found: format!("{:?}", other.data_type()),
            }),
        }
    }

    pub fn load_tree(&self, id: HashId) -> StoreResult<Tree> {
        let object = self.load_typed(id, DataType::Tree)?;
        match object {
            Object::Tree(tree) => Ok(tree),
            Object::Index(index) => {
                let bytes = self.reassemble(&index)?;
                match serialize::decode_object(DataType::Tree, bytes)? {
                    Object::Tree(tree) => Ok(tree),
                    _ => unreachable!("decode_object(Tree, _) always yields Object::Tree"),
                }
            }
            other => Err(StoreError::TypeMismatch {
                id,
                expected: "Tree".into(),
                found: format!("{:?}", other.data_type()),
            }),
        }
    }

    pub fn load_renames(&self, id: HashId) -> StoreResult<Renames> {
        let object = self.load_typed(id, DataType::Renames)?;
        match object {
            Object::Renames(renames) => Ok(renames),
            Object::Index(index) => {
                let bytes = self.reassemble(&index)?;
                match serialize::decode_object(DataType::Renames, bytes)? {
                    Object::Renames(renames) => Ok(renames),
                    _ => unreachable!("decode_object(Renames, _) always yields Object::Renames"),
                }
            }
            other => Err(StoreError::TypeMismatch {
                id,
                expected: "Renames".into(),
                found: format!("{:?}", other.data_type()),
            }),
        }
    }

    pub fn load_index(&self, id: HashId) -> StoreResult<IndexObject> {
        match self.load_typed(id, DataType::Index)? {
            Object::Index(index) => Ok(index),
            other => Err(StoreError::TypeMismatch {
                id,
                expected: "Index".into(),
                found: format!("{:?}", other.data_type()),
            }),
        }
    }

    fn reassemble(&self, index: &IndexObject) -> StoreResult<Buffer> {
        let mut out = Vec::with_capacity(index.size() as usize);
        for part in index.parts() {
            let blob = self.load_blob(part.blob_id)?;
            if blob.len() as u64 != part.size {
                return Err(StoreError::corruption(format!(
                    "index part {} declares size {} but blob {} has size {}",
                    part.blob_id,
                    part.size,
                    part.blob_id,
                    blob.len()
                )));
            }
            out.extend_from_slice(&blob);
        }
        Ok(Buffer::from(out))
    }

    fn put_single(&self, ty: DataType, content: &[u8]) -> StoreResult<HashId> {
        let header = DataHeader::new(ty, content.len() as u64)?;
        let id = HashId::digest(&header.to_bytes(), content);
        for backend in &self.backends {
            backend.put(id, ty, content)?;
        }
        Ok(id)
    }

    /// Stores `content` under `ty`, chunking transparently if it exceeds
    /// `chunk_size`. Returns the stored id and the type actually used to
    /// store it (`ty` directly, or `Index` if chunked).
    pub fn put(&self, ty: DataType, content: &[u8]) -> StoreResult<(HashId, DataType)> {
        if content.len() as u64 <= self.chunk_size {
            return Ok((self.put_single(ty, content)?, ty));
        }

        let original_header = DataHeader::new(ty, content.len() as u64)?;
        let original_id = HashId::digest(&original_header.to_bytes(), content);

        let chunk_size = self.chunk_size.max(1) as usize;
        let mut parts = Vec::new();
        for chunk in content.chunks(chunk_size) {
            let blob_id = self.put_single(DataType::Blob, chunk)?;
            parts.push(IndexPart {
                blob_id,
                size: chunk.len() as u64,
            });
        }

        let index = IndexObject {
            original_id,
            original_type: ty,
            parts,
        };
        let index_bytes = serialize::canonical_bytes(&Object::Index(index))?;
        let index_id = self.put_single(DataType::Index, &index_bytes)?;
        Ok((index_id, DataType::Index))
    }

    pub fn put_object(&self, object: &Object) -> StoreResult<HashId> {
        let content = serialize::canonical_bytes(object)?;
        let (id, _) = self.put(object.data_type(), &content)?;
        Ok(id)
    }

    /// The generation a commit with these `parents`/`renames_id` should
    /// carry: `1 + max(generation(p) for p in parents ∪ renames.commits)`,
    /// or `1` if that set is empty. Grounded on `commit.cpp`'s
    /// `GetLargestGeneration`, split into "largest source generation" (here)
    /// plus the caller's `+ 1` so a from-scratch root commit can ask for
    /// generation `1` without a degenerate empty-parents call.
    pub fn next_commit_generation(
        &self,
        parents: &[HashId],
        renames_id: Option<HashId>,
    ) -> StoreResult<u32> {
        let mut largest = 0u32;
        for &id in parents {
            largest = largest.max(self.load_commit(id)?.generation);
        }
        if let Some(renames_id) = renames_id {
            for &id in &self.load_renames(renames_id)?.commits {
                largest = largest.max(self.load_commit(id)?.generation);
            }
        }
        Ok(largest + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::loose::LooseBackend;

    fn store_with_loose() -> (tempfile::TempDir, Datastore) {
        let dir = tempfile::tempdir().unwrap();
        let loose = Arc::new(LooseBackend::new(dir.path()).unwrap());
        (dir, Datastore::new(vec![loose]))
    }

    #[test]
    fn small_content_is_stored_directly() {
        let (_dir, store) = store_with_loose();
        let content = b"hello world";
        let (id, ty) = store.put(DataType::Blob, content).unwrap();
        assert_eq!(ty, DataType::Blob);
        assert_eq!(&*store.load_blob(id).unwrap(), content);
    }

    #[test]
    fn oversized_content_is_chunked_and_reassembled() {
        let dir = tempfile::tempdir().unwrap();
        let loose = Arc::new(LooseBackend::new(dir.path()).unwrap());
        let store = Datastore::new(vec![loose]).with_chunk_size(16);
        let content: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let (id, ty) = store.put(DataType::Blob, &content).unwrap();
        assert_eq!(ty, DataType::Index);
        let index = store.load_index(id).unwrap();
        assert_eq!(index.size(), content.len() as u64);
        assert!(index.parts().len() > 1);
        assert_eq!(&*store.load_blob(id).unwrap(), content.as_slice());
    }

    #[test]
    fn caching_mode_populates_local_backend_on_upstream_hit() {
        let upstream_dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(LooseBackend::new(upstream_dir.path()).unwrap());
        let upstream_store = Datastore::new(vec![upstream.clone()]);
        let content = b"shared blob";
        let (id, _) = upstream_store.put(DataType::Blob, content).unwrap();

        let local = Arc::new(MemoryCache::new(4096));
        assert!(local.is_empty());
        let layered = Datastore::new(vec![local.clone(), upstream]);
        assert_eq!(&*layered.load_blob(id).unwrap(), content);
        // The local cache should now have it without touching upstream.
        assert!(local.get(id).is_some());
    }

    #[test]
    fn missing_id_is_not_found() {
        let (_dir, store) = store_with_loose();
        let missing = HashId::digest(b"nope", b"nope");
        assert!(store.load(missing, None).unwrap().is_none());
        assert!(matches!(
            store.load_blob(missing).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    fn bare_commit(store: &Datastore, generation: u32, parents: Vec<HashId>) -> HashId {
        let commit = Commit {
            tree_id: HashId::NULL,
            generation,
            parents,
            committer: crate::object::Signature::default(),
            author: crate::object::Signature::default(),
            message: String::new(),
            attributes: Vec::new(),
            renames_id: None,
        };
        store.put_object(&Object::Commit(commit)).unwrap()
    }

    #[test]
    fn next_commit_generation_is_one_past_the_largest_parent() {
        let (_dir, store) = store_with_loose();
        let root = bare_commit(&store, 1, vec![]);
        assert_eq!(store.next_commit_generation(&[], None).unwrap(), 1);

        let a = bare_commit(&store, 2, vec![root]);
        let b = bare_commit(&store, 5, vec![root]);
        assert_eq!(store.next_commit_generation(&[a, b], None).unwrap(), 6);
    }

    #[test]
    fn next_commit_generation_accounts_for_rename_sources() {
        let (_dir, store) = store_with_loose();
        let root = bare_commit(&store, 1, vec![]);
        let old_copy_source = bare_commit(&store, 9, vec![]);

        let renames = Renames {
            commits: vec![old_copy_source],
            copies: Vec::new(),
            replaces: Vec::new(),
        };
        let renames_id = store.put_object(&Object::Renames(renames)).unwrap();

        assert_eq!(
            store.next_commit_generation(&[root], Some(renames_id)).unwrap(),
            10
        );
    }
}
