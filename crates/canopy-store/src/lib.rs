//! # canopy-store
//!
//! Content-addressed node storage for Canopy tree manifests.
//!
//! Every serialized tree node is stored under its [`NodeHash`], a 20-byte
//! digest of the node bytes. The manifest layer only depends on the
//! [`ContentStore`] contract; this crate ships two implementations:
//!
//! - [`FsStore`]: sharded on-disk layout, atomic writes, verify-on-read
//! - [`MemoryStore`]: in-memory map with fetch accounting and fault injection
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! └── nodes/
//!     └── ab/
//!         └── cd/
//!             └── abcd1234...   # 40 hex chars
//! ```

mod batch;
mod fs;
mod memory;

pub use batch::{default_thread_count, MAX_WRITE_THREADS};
pub use fs::{FsStore, FsStoreIter, StoreStats};
pub use memory::{FailureMode, MemoryStore};

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a node hash in bytes.
pub const HASH_LEN: usize = 20;

/// Content identifier of a serialized tree node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeHash([u8; HASH_LEN]);

impl NodeHash {
    /// The all-zero hash. Never produced by [`compute_hash`]; used as the
    /// "no tree" marker.
    pub const NULL: NodeHash = NodeHash([0u8; HASH_LEN]);

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice, returning `None` unless it is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 40 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != HASH_LEN * 2 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self.to_hex())
    }
}

impl FromStr for NodeHash {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s).ok_or_else(|| StoreError::InvalidHash(s.to_string()))
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Compute the node hash of the given bytes.
///
/// BLAKE3 in extendable-output mode, truncated to [`HASH_LEN`] bytes.
#[inline]
pub fn compute_hash(data: &[u8]) -> NodeHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    let mut out = [0u8; HASH_LEN];
    hasher.finalize_xof().fill(&mut out);
    NodeHash(out)
}

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Node not found: {hash}")]
    NotFound { hash: NodeHash },

    /// The store could not answer right now; a retry may succeed.
    #[error("Transient failure fetching {hash}: {reason}")]
    Transient { hash: NodeHash, reason: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: NodeHash, actual: NodeHash },

    #[error("Invalid node hash: {0}")]
    InvalidHash(String),
}

impl StoreError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transient { .. } => true,
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Read side of a node store.
///
/// Implementations may be slow or remote. They must not retry internally on
/// behalf of the manifest layer; retry policy belongs to the caller.
pub trait ContentStore: Send + Sync {
    /// Return the raw bytes stored under `hash`.
    fn fetch(&self, hash: &NodeHash) -> Result<Vec<u8>>;

    /// Check whether `hash` is present without reading it.
    fn contains(&self, hash: &NodeHash) -> Result<bool>;
}

/// Write side of a node store. Writes are content addressed: the key is
/// always [`compute_hash`] of the bytes, and storing existing content is a
/// no-op.
pub trait WritableStore: ContentStore {
    fn put(&self, data: &[u8]) -> Result<NodeHash>;

    /// Store many blobs, returning their hashes in input order.
    fn put_batch(&self, blobs: &[Vec<u8>]) -> Result<Vec<NodeHash>> {
        blobs.iter().map(|b| self.put(b)).collect()
    }
}

impl<S: ContentStore + ?Sized> ContentStore for std::sync::Arc<S> {
    fn fetch(&self, hash: &NodeHash) -> Result<Vec<u8>> {
        (**self).fetch(hash)
    }

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        (**self).contains(hash)
    }
}

impl<S: WritableStore + ?Sized> WritableStore for std::sync::Arc<S> {
    fn put(&self, data: &[u8]) -> Result<NodeHash> {
        (**self).put(data)
    }

    fn put_batch(&self, blobs: &[Vec<u8>]) -> Result<Vec<NodeHash>> {
        (**self).put_batch(blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_deterministic() {
        let a = compute_hash(b"tree node");
        let b = compute_hash(b"tree node");
        assert_eq!(a, b);
        assert_ne!(a, compute_hash(b"other node"));
    }

    #[test]
    fn test_hash_is_blake3_prefix() {
        // XOF output starts with the regular 32-byte digest
        let full = blake3::hash(b"abc");
        let short = compute_hash(b"abc");
        assert_eq!(&full.as_bytes()[..HASH_LEN], short.as_bytes());
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = compute_hash(b"hex");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(NodeHash::from_hex(&hex), Some(hash));
        assert_eq!(hex.parse::<NodeHash>().unwrap(), hash);
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(NodeHash::from_hex("abcd").is_none());
        assert!(NodeHash::from_hex(&"zz".repeat(20)).is_none());
        assert!(matches!(
            "nope".parse::<NodeHash>(),
            Err(StoreError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_null_hash() {
        assert!(NodeHash::NULL.is_null());
        assert!(!compute_hash(b"").is_null());
        assert_eq!(NodeHash::default(), NodeHash::NULL);
    }

    #[test]
    fn test_retryable_classification() {
        let hash = compute_hash(b"x");
        assert!(StoreError::Transient {
            hash,
            reason: "timeout".into()
        }
        .is_retryable());
        assert!(!StoreError::NotFound { hash }.is_retryable());
        assert!(StoreError::NotFound { hash }.is_not_found());
        assert!(StoreError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_retryable());
        assert!(!StoreError::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_retryable());
    }
}
