//! The storage backend contract.
//!
//! A [`Backend`] is one tier in the [`crate::datastore::Datastore`] chain
//! (memory cache, loose files, leveled pack store, …). All methods must be
//! safe to call concurrently — the trait is `Send + Sync` even though the
//! public surface is synchronous, since the leveled store serializes writers
//! internally with a plain `RwLock` rather than an async runtime.

use crate::error::StoreResult;
use crate::hash::HashId;
use crate::header::DataHeader;
use crate::header::DataType;
use crate::object::Buffer;

/// One backend's view of an id's header, without loading the payload.
pub type BackendMeta = DataHeader;

/// A storage tier. Implementations decide their own on-disk or in-memory
/// representation; the only contract is content-addressing (`put`'s
/// argument id must equal `HashId::digest(header, content)`) and that
/// `load`'s returned bytes are the exact canonical payload for `ty`.
pub trait Backend: std::fmt::Debug + Send + Sync {
    /// A short name for diagnostics (tracing spans, error messages).
    fn name(&self) -> &str;

    /// Returns the stored header for `id`, or `None` if this backend does
    /// not have it. Never returns `NotFound` as an `Err`; absence is `Ok(None)`.
    fn get_meta(&self, id: HashId) -> StoreResult<Option<BackendMeta>>;

    /// Cheaper than `get_meta` where the backend can answer without
    /// decoding a header (e.g. a filesystem `stat`).
    fn exists(&self, id: HashId) -> StoreResult<bool> {
        Ok(self.get_meta(id)?.is_some())
    }

    /// Loads `id`'s payload. `expected` narrows the accepted type: a
    /// mismatch (other than the stored type being `Index`, which callers
    /// resolve themselves) yields `Ok(None)`, not an error. Absence is also
    /// `Ok(None)`; only I/O or corruption bubbles up as `Err`.
    fn load(&self, id: HashId, expected: Option<DataType>) -> StoreResult<Option<(DataType, Buffer)>>;

    /// Stores `content` under `id` with header type `ty`. Implementations
    /// may assume the caller has already validated that
    /// `id == HashId::digest(header(ty, content.len()), content)`.
    fn put(&self, id: HashId, ty: DataType, content: &[u8]) -> StoreResult<()>;
}
