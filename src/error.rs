//! Crate-wide error type.
//!
//! One enum composed across the fallible subsystems, following the shape of
//! `BackendError` in a typical `thiserror`-based backend error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::hash::HashId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(HashId),

    #[error("object {id}: expected type {expected}, found {found}")]
    TypeMismatch {
        id: HashId,
        expected: String,
        found: String,
    },

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("content of {size} bytes exceeds capacity {capacity}")]
    CapacityExceeded { size: u64, capacity: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] std::io::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        StoreError::Corruption(message.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
