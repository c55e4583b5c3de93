//! In-memory node store.
//!
//! Used by tests and by callers that build manifests without persistence.
//! Keeps a fetch counter and supports per-hash failure injection so callers
//! can observe how many round-trips an operation costs and how it reacts to
//! a misbehaving backend.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::{compute_hash, ContentStore, NodeHash, Result, StoreError, WritableStore};

/// Failure to report for an injected hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Behave as if the node was never stored
    NotFound,
    /// Report a retryable backend failure
    Transient,
    /// Return garbage bytes instead of the stored ones
    Corrupt,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<NodeHash, Vec<u8>>,
    failures: DashMap<NodeHash, FailureMode>,
    fetches: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch` calls served so far (including failed ones).
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Make subsequent fetches of `hash` fail with `mode`.
    pub fn inject_failure(&self, hash: NodeHash, mode: FailureMode) {
        self.failures.insert(hash, mode);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Store bytes under an arbitrary key, bypassing content addressing.
    pub fn insert_raw(&self, hash: NodeHash, data: Vec<u8>) {
        self.blobs.insert(hash, data);
    }

    pub fn remove(&self, hash: &NodeHash) -> Option<Vec<u8>> {
        self.blobs.remove(hash).map(|(_, v)| v)
    }
}

impl ContentStore for MemoryStore {
    fn fetch(&self, hash: &NodeHash) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        trace!(hash = %hash, "Memory fetch");

        if let Some(mode) = self.failures.get(hash).map(|m| *m) {
            return match mode {
                FailureMode::NotFound => Err(StoreError::NotFound { hash: *hash }),
                FailureMode::Transient => Err(StoreError::Transient {
                    hash: *hash,
                    reason: "injected failure".to_string(),
                }),
                FailureMode::Corrupt => Ok(b"\xffcorrupt".to_vec()),
            };
        }

        self.blobs
            .get(hash)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound { hash: *hash })
    }

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        Ok(self.blobs.contains_key(hash))
    }
}

impl WritableStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<NodeHash> {
        let hash = compute_hash(data);
        self.blobs.entry(hash).or_insert_with(|| data.to_vec());
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_fetch_counts() {
        let store = MemoryStore::new();
        let hash = store.put(b"abc").unwrap();

        assert_eq!(store.fetch_count(), 0);
        assert_eq!(store.fetch(&hash).unwrap(), b"abc");
        assert_eq!(store.fetch(&hash).unwrap(), b"abc");
        assert_eq!(store.fetch_count(), 2);

        store.reset_fetch_count();
        assert_eq!(store.fetch_count(), 0);
    }

    #[test]
    fn test_contains_does_not_count() {
        let store = MemoryStore::new();
        let hash = store.put(b"abc").unwrap();
        assert!(store.contains(&hash).unwrap());
        assert_eq!(store.fetch_count(), 0);
    }

    #[test]
    fn test_injected_failures() {
        let store = MemoryStore::new();
        let hash = store.put(b"abc").unwrap();

        store.inject_failure(hash, FailureMode::Transient);
        let err = store.fetch(&hash).unwrap_err();
        assert!(err.is_retryable());

        store.inject_failure(hash, FailureMode::NotFound);
        assert!(store.fetch(&hash).unwrap_err().is_not_found());

        store.inject_failure(hash, FailureMode::Corrupt);
        assert_ne!(store.fetch(&hash).unwrap(), b"abc");

        store.clear_failures();
        assert_eq!(store.fetch(&hash).unwrap(), b"abc");
    }

    #[test]
    fn test_dedup_and_remove() {
        let store = MemoryStore::new();
        store.put(b"x").unwrap();
        let hash = store.put(b"x").unwrap();
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove(&hash), Some(b"x".to_vec()));
        assert!(store.is_empty());
        assert!(store.fetch(&hash).unwrap_err().is_not_found());
    }
}
