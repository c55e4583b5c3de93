//! Immutable directory nodes with deferred child loading.
//!
//! A [`LazyTreeNode`] owns its sorted entries and, for each directory entry,
//! a slot that is filled the first time the child is asked for. Slots sit
//! behind `Arc`, so versions derived with [`LazyTreeNode::with_entry`] and
//! friends share both untouched entries and whatever was already loaded
//! beneath them.

use std::fmt;
use std::sync::Arc;

use canopy_store::NodeHash;
use once_cell::sync::OnceCell;

use crate::codec::{self, path_order, validate_name, Entry, EMPTY_TREE};
use crate::error::{EncodeError, Result};
use crate::source::NodeSource;

#[derive(Clone)]
enum Slot {
    Leaf(Entry),
    Dir {
        entry: Entry,
        child: Arc<OnceCell<LazyTreeNode>>,
    },
}

impl Slot {
    fn new(entry: Entry) -> Self {
        if entry.is_dir() {
            Slot::Dir {
                entry,
                child: Arc::new(OnceCell::new()),
            }
        } else {
            Slot::Leaf(entry)
        }
    }

    fn loaded(entry: Entry, node: LazyTreeNode) -> Self {
        Slot::Dir {
            entry,
            child: Arc::new(OnceCell::with_value(node)),
        }
    }

    fn entry(&self) -> &Entry {
        match self {
            Slot::Leaf(entry) | Slot::Dir { entry, .. } => entry,
        }
    }
}

struct NodeInner {
    hash: NodeHash,
    slots: Vec<Slot>,
}

/// One directory of a tree manifest.
///
/// Cloning is a reference count bump.
#[derive(Clone)]
pub struct LazyTreeNode(Arc<NodeInner>);

impl LazyTreeNode {
    /// The node with no entries.
    pub fn empty() -> Self {
        Self(Arc::new(NodeInner {
            hash: *EMPTY_TREE,
            slots: Vec::new(),
        }))
    }

    /// Build a node from entries in any order, validating them like
    /// [`codec::encode`].
    pub fn from_entries(entries: Vec<Entry>) -> std::result::Result<Self, EncodeError> {
        let bytes = codec::encode(&entries)?;
        let mut entries = entries;
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Ok(Self(Arc::new(NodeInner {
            hash: codec::hash_bytes(&bytes),
            slots: entries.into_iter().map(Slot::new).collect(),
        })))
    }

    /// Wrap entries fresh out of [`codec::decode`], which already checked
    /// order and names.
    pub(crate) fn from_decoded(hash: NodeHash, entries: Vec<Entry>) -> Self {
        Self(Arc::new(NodeInner {
            hash,
            slots: entries.into_iter().map(Slot::new).collect(),
        }))
    }

    fn from_slots(slots: Vec<Slot>) -> Self {
        let bytes = codec::encode_canonical(slots.iter().map(Slot::entry));
        Self(Arc::new(NodeInner {
            hash: codec::hash_bytes(&bytes),
            slots,
        }))
    }

    pub fn hash(&self) -> NodeHash {
        self.0.hash
    }

    pub fn len(&self) -> usize {
        self.0.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.slots.is_empty()
    }

    /// Entries in name byte order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &Entry> + '_ {
        self.0.slots.iter().map(Slot::entry)
    }

    /// Canonical bytes of this node.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_canonical(self.entries())
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.0
            .slots
            .binary_search_by(|slot| slot.entry().name.as_bytes().cmp(name.as_bytes()))
    }

    /// Look up an entry by name without loading anything.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.position(name).ok().map(|i| self.0.slots[i].entry())
    }

    pub(crate) fn entry_at(&self, index: usize) -> &Entry {
        self.0.slots[index].entry()
    }

    /// Materialized child directory `name`.
    ///
    /// Returns `Ok(None)` when there is no such entry or it is not a
    /// directory. The first call per slot goes to `source`; later calls, on
    /// this node or any node derived from it, reuse the result.
    pub fn child(&self, name: &str, source: &NodeSource) -> Result<Option<LazyTreeNode>> {
        match self.position(name) {
            Ok(index) => self.child_at(index, source),
            Err(_) => Ok(None),
        }
    }

    pub(crate) fn child_at(&self, index: usize, source: &NodeSource) -> Result<Option<LazyTreeNode>> {
        match &self.0.slots[index] {
            Slot::Leaf(_) => Ok(None),
            Slot::Dir { entry, child } => child
                .get_or_try_init(|| source.load(&entry.hash))
                .map(|node| Some(node.clone())),
        }
    }

    /// Whether directory `name` has already been loaded.
    pub fn is_materialized(&self, name: &str) -> bool {
        match self.position(name) {
            Ok(index) => match &self.0.slots[index] {
                Slot::Dir { child, .. } => child.get().is_some(),
                Slot::Leaf(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Directory entries, each with its child if it has been loaded.
    pub(crate) fn directories(&self) -> impl Iterator<Item = (&Entry, Option<&LazyTreeNode>)> {
        self.0.slots.iter().filter_map(|slot| match slot {
            Slot::Dir { entry, child } => Some((entry, child.get())),
            Slot::Leaf(_) => None,
        })
    }

    /// Slot indices in traversal order, where a directory sorts as `name/`.
    pub(crate) fn traversal_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| path_order(self.entry_at(a), self.entry_at(b)));
        order
    }

    /// New node with `entry` inserted or replacing the entry of the same name.
    ///
    /// A replaced directory loses its loaded child; everything else is shared.
    pub fn with_entry(&self, entry: Entry) -> std::result::Result<Self, EncodeError> {
        validate_name(&entry.name).map_err(|reason| EncodeError::InvalidName {
            name: entry.name.clone(),
            reason,
        })?;
        let index = self.position(&entry.name);
        if let Ok(i) = index {
            if *self.entry_at(i) == entry {
                return Ok(self.clone());
            }
        }
        Ok(self.replace(index, Slot::new(entry)))
    }

    /// Like [`with_entry`](Self::with_entry) for a directory whose node is
    /// already at hand; the slot starts out loaded.
    pub fn with_child(
        &self,
        name: &str,
        child: LazyTreeNode,
    ) -> std::result::Result<Self, EncodeError> {
        validate_name(name).map_err(|reason| EncodeError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        let index = self.position(name);
        if let Ok(i) = index {
            let existing = self.entry_at(i);
            if existing.is_dir() && existing.hash == child.hash() {
                return Ok(self.clone());
            }
        }
        let entry = Entry::directory(name, child.hash());
        Ok(self.replace(index, Slot::loaded(entry, child)))
    }

    /// New node without `name`, or `None` if there is no such entry.
    pub fn without_entry(&self, name: &str) -> Option<Self> {
        let index = self.position(name).ok()?;
        let mut slots = self.0.slots.clone();
        slots.remove(index);
        Some(Self::from_slots(slots))
    }

    fn replace(&self, index: std::result::Result<usize, usize>, slot: Slot) -> Self {
        let mut slots = Vec::with_capacity(self.len() + 1);
        slots.extend(self.0.slots.iter().cloned());
        match index {
            Ok(i) => slots[i] = slot,
            Err(i) => slots.insert(i, slot),
        }
        Self::from_slots(slots)
    }

    /// Whether both handles point at the same node allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Default for LazyTreeNode {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for LazyTreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for LazyTreeNode {}

impl fmt::Debug for LazyTreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTreeNode")
            .field("hash", &self.hash())
            .field("entries", &self.len())
            .finish()
    }
}
