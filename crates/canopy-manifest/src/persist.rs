//! Writing new nodes back to a store.

use std::collections::HashSet;
use std::time::Instant;

use canopy_config::{log_manifest_debug, log_store_debug, log_store_info};
use canopy_store::{NodeHash, WritableStore};
use serde::{Deserialize, Serialize};

use crate::codec::EMPTY_TREE;
use crate::error::Result;
use crate::manifest::TreeManifest;
use crate::node::LazyTreeNode;
use crate::source::NodeSource;

/// Outcome of [`TreeManifest::persist`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistStats {
    /// Nodes handed to the store
    pub nodes_written: usize,
    /// Encoded size of the written nodes
    pub bytes_written: u64,
    /// Subtrees skipped because the store already had their root
    pub nodes_present: usize,
}

impl TreeManifest {
    /// Write every node of this tree that `store` does not already hold.
    ///
    /// Nodes are collected children first and written in one batch. A
    /// subtree whose root `store` already has is skipped whole. Unloaded
    /// subtrees missing from `store` are read through this manifest's own
    /// source, so `store` may differ from the one the tree was loaded from.
    pub fn persist(&self, store: &dyn WritableStore) -> Result<PersistStats> {
        let start = Instant::now();
        let mut stats = PersistStats::default();
        let mut blobs = Vec::new();
        let mut seen = HashSet::new();

        let mut ctx = Collector {
            source: self.source(),
            store,
            seen: &mut seen,
            blobs: &mut blobs,
            stats: &mut stats,
        };
        ctx.collect(self.root(), self.loaded_root().cloned())?;

        if !blobs.is_empty() {
            let hashes = store.put_batch(&blobs)?;
            debug_assert_eq!(hashes.last(), Some(&self.root()));
        }
        stats.nodes_written = blobs.len();
        stats.bytes_written = blobs.iter().map(|b| b.len() as u64).sum();

        log_store_info!(
            "Persisted manifest",
            root = tracing::field::display(self.root()),
            nodes = stats.nodes_written,
            bytes = stats.bytes_written,
            present = stats.nodes_present,
            elapsed_ms = start.elapsed().as_millis() as u64,
        );
        Ok(stats)
    }
}

struct Collector<'a> {
    source: &'a NodeSource,
    store: &'a dyn WritableStore,
    seen: &'a mut HashSet<NodeHash>,
    blobs: &'a mut Vec<Vec<u8>>,
    stats: &'a mut PersistStats,
}

impl Collector<'_> {
    /// Post-order: a parent is pushed after all of its children.
    fn collect(&mut self, hash: NodeHash, loaded: Option<LazyTreeNode>) -> Result<()> {
        if hash.is_null() || hash == *EMPTY_TREE || !self.seen.insert(hash) {
            return Ok(());
        }
        if self.store.contains(&hash)? {
            self.stats.nodes_present += 1;
            return Ok(());
        }
        let node = match loaded {
            Some(node) => node,
            None => {
                log_store_debug!(
                    "Copying unloaded subtree",
                    hash = tracing::field::display(hash)
                );
                self.source.load(&hash)?
            }
        };
        for (entry, child) in node.directories() {
            log_manifest_debug!("Collecting subtree", name = entry.name.as_str());
            self.collect(entry.hash, child.cloned())?;
        }
        self.blobs.push(node.encode());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EntryKind;
    use canopy_store::{ContentStore, FailureMode, MemoryStore, HASH_LEN};
    use std::sync::Arc;

    fn h(n: u8) -> NodeHash {
        NodeHash::from_bytes([n; HASH_LEN])
    }

    #[test]
    fn test_persist_then_reload() {
        let scratch = Arc::new(MemoryStore::new());
        let m = TreeManifest::from_files(
            scratch,
            [
                ("a/b.txt", h(1), EntryKind::File),
                ("a/c.txt", h(2), EntryKind::File),
                ("d.txt", h(3), EntryKind::File),
            ],
        )
        .unwrap();

        let target = Arc::new(MemoryStore::new());
        let stats = m.persist(&*target).unwrap();
        assert_eq!(stats.nodes_written, 2);
        assert_eq!(target.len(), 2);

        let reloaded = TreeManifest::new(target, m.root());
        assert_eq!(reloaded.find("a/c.txt").unwrap().map(|e| e.hash), Some(h(2)));
    }

    #[test]
    fn test_persist_skips_present_subtrees() {
        let store = Arc::new(MemoryStore::new());
        let m = TreeManifest::from_files(
            store.clone(),
            [
                ("keep/x", h(1), EntryKind::File),
                ("edit/y", h(2), EntryKind::File),
            ],
        )
        .unwrap();
        assert_eq!(m.persist(&*store).unwrap().nodes_written, 3);

        let edited = m.set("edit/y", h(9), EntryKind::File).unwrap();
        let stats = edited.persist(&*store).unwrap();
        // new root and new edit/, keep/ already stored
        assert_eq!(stats.nodes_written, 2);
        assert_eq!(stats.nodes_present, 1);

        let again = edited.persist(&*store).unwrap();
        assert_eq!(again.nodes_written, 0);
        assert_eq!(again.nodes_present, 1);
    }

    #[test]
    fn test_persist_empty_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let m = TreeManifest::empty(store.clone());
        assert_eq!(m.persist(&*store).unwrap(), PersistStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_lazy_manifest_to_other_store() {
        let origin = Arc::new(MemoryStore::new());
        let built = TreeManifest::from_files(
            origin.clone(),
            [
                ("keep/x", h(1), EntryKind::File),
                ("keep/deep/z", h(3), EntryKind::File),
                ("edit/y", h(2), EntryKind::File),
            ],
        )
        .unwrap();
        built.persist(&*origin).unwrap();

        // only the root and edit/ get loaded by the edit
        let lazy = TreeManifest::new(origin.clone(), built.root());
        let edited = lazy.set("edit/y", h(9), EntryKind::File).unwrap();
        assert!(!edited.root_node().unwrap().is_materialized("keep"));

        let target = Arc::new(MemoryStore::new());
        let stats = edited.persist(&*target).unwrap();
        assert_eq!(stats.nodes_written, 4);
        assert_eq!(stats.nodes_present, 0);

        let reloaded = TreeManifest::new(target.clone(), edited.root());
        let walked: Vec<_> = reloaded
            .walk()
            .map(|r| {
                let (path, entry) = r.unwrap();
                (path, entry.hash)
            })
            .collect();
        assert_eq!(
            walked,
            vec![
                ("edit/y".to_string(), h(9)),
                ("keep/deep/z".to_string(), h(3)),
                ("keep/x".to_string(), h(1)),
            ]
        );

        // a second target that already holds keep/ only receives the rest
        let partial = Arc::new(MemoryStore::new());
        let keep = built.find("keep").unwrap().unwrap().hash;
        partial.insert_raw(keep, origin.fetch(&keep).unwrap());
        let stats = edited.persist(&*partial).unwrap();
        assert_eq!(stats.nodes_written, 2);
        assert_eq!(stats.nodes_present, 1);
    }

    #[test]
    fn test_persist_reports_unreadable_subtree() {
        let origin = Arc::new(MemoryStore::new());
        let built = TreeManifest::from_files(
            origin.clone(),
            [("keep/x", h(1), EntryKind::File), ("edit/y", h(2), EntryKind::File)],
        )
        .unwrap();
        built.persist(&*origin).unwrap();
        let keep = built.find("keep").unwrap().unwrap().hash;

        let edited = TreeManifest::new(origin.clone(), built.root())
            .set("edit/y", h(9), EntryKind::File)
            .unwrap();
        origin.inject_failure(keep, FailureMode::Transient);

        let target = Arc::new(MemoryStore::new());
        let err = edited.persist(&*target).unwrap_err();
        assert!(err.is_retryable());
        assert!(target.is_empty());
    }
}
