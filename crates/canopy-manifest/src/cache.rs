//! Hash-keyed cache of decoded nodes, shared across manifests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use canopy_config::log_cache_trace;
use canopy_store::NodeHash;
use dashmap::DashMap;

use crate::codec::Entry;
use crate::node::LazyTreeNode;

/// Bounded map from node hash to decoded entries.
///
/// Only the entry list is kept, never the node itself: each hit builds a
/// fresh [`LazyTreeNode`] with unloaded children, so whatever a manifest
/// loads below a cached node is dropped with that manifest. When
/// `max_nodes` is reached an arbitrary resident entry is evicted to make
/// room. Content addressing means an entry never goes stale.
#[derive(Debug)]
pub struct NodeCache {
    nodes: DashMap<NodeHash, Arc<[Entry]>>,
    max_nodes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl NodeCache {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            max_nodes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: &NodeHash) -> Option<LazyTreeNode> {
        let entries = match self.nodes.get(hash) {
            Some(entries) => Arc::clone(entries.value()),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        log_cache_trace!("Cache hit", hash = tracing::field::display(hash));
        Some(LazyTreeNode::from_decoded(*hash, entries.to_vec()))
    }

    /// Keep the entries of `node`. Returns false only for a zero-capacity
    /// cache.
    pub fn insert(&self, node: &LazyTreeNode) -> bool {
        if self.max_nodes == 0 {
            return false;
        }
        let hash = node.hash();
        if self.nodes.contains_key(&hash) {
            return true;
        }
        while self.nodes.len() >= self.max_nodes {
            // the guard must be dropped before removing
            let victim = self.nodes.iter().next().map(|e| *e.key());
            match victim {
                Some(victim) => {
                    if self.nodes.remove(&victim).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        log_cache_trace!("Evicted", hash = tracing::field::display(victim));
                    }
                }
                None => break,
            }
        }
        self.nodes.insert(hash, node.entries().cloned().collect());
        true
    }

    pub fn contains(&self, hash: &NodeHash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_nodes
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
