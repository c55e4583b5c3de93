//! Error types for manifest operations.

use canopy_store::{NodeHash, StoreError};
use thiserror::Error;

/// Invalid entries handed to the encoder
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Duplicate entry name: {0:?}")]
    DuplicateName(String),
}

/// Malformed node bytes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Bad node header")]
    BadMagic,

    #[error("Truncated node: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("Invalid kind tag {tag:#04x} at offset {offset}")]
    InvalidKind { tag: u8, offset: usize },

    #[error("Entry name at offset {offset} is not UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Entry {name:?} is out of canonical order")]
    OutOfOrder { name: String },

    #[error("{count} trailing bytes after last entry")]
    TrailingBytes { count: usize },

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: NodeHash, actual: NodeHash },
}

/// Errors surfaced by [`TreeManifest`](crate::TreeManifest),
/// [`LazyTreeNode`](crate::LazyTreeNode) and [`Diff`](crate::Diff).
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Malformed node {hash}: {source}")]
    Decode {
        hash: NodeHash,
        #[source]
        source: DecodeError,
    },

    #[error("Failed to fetch node {hash}: {source}")]
    StoreFetch {
        hash: NodeHash,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Path conflict: {path} is not a directory")]
    PathConflict { path: String },

    #[error("Refusing to add empty directory: {0}")]
    EmptyDirectory(String),
}

impl ManifestError {
    /// Whether the failure came from a store error that a retry could fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            ManifestError::StoreFetch { source, .. } | ManifestError::Store(source) => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManifestError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;
