//! # canopy-manifest
//!
//! Persistent, content-addressed directory trees.
//!
//! A manifest maps slash-separated paths to `(hash, kind)` entries. Each
//! directory is an immutable node identified by the hash of its canonical
//! encoding, so equal trees have equal root hashes and unchanged subtrees
//! are shared between versions.
//!
//! ## Architecture
//!
//! ```text
//! TreeManifest ──► LazyTreeNode ──► NodeSource ──► NodeCache
//!   find/set/       sorted entries,    fetch, verify,    hash → node
//!   remove/walk/    lazy child slots   decode            (bounded)
//!   diff/persist                          │
//!                                         ▼
//!                                   ContentStore (canopy-store)
//! ```
//!
//! Nodes are loaded from the store only when an operation needs to look
//! inside them. Mutations rebuild the path from the edited entry up to the
//! root and share everything else.

pub mod cache;
pub mod codec;
pub mod diff;
pub mod error;
pub mod manifest;
pub mod node;
pub mod persist;
pub mod source;
pub mod walk;

pub use cache::NodeCache;
pub use codec::{decode, encode, hash, hash_bytes, validate_name, Entry, EntryKind, EMPTY_TREE};
pub use diff::{diff, Diff, DiffEntry, DiffStatus};
pub use error::{DecodeError, EncodeError, ManifestError, Result};
pub use manifest::{ManifestStats, TreeManifest};
pub use node::LazyTreeNode;
pub use persist::PersistStats;
pub use source::{open_store, NodeSource};
pub use walk::Walk;

pub use canopy_store::NodeHash;
