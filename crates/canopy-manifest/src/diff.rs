//! Lazy comparison of two manifests.
//!
//! Both trees are walked in lock-step in full-path order. Directories whose
//! hashes agree are skipped without being loaded, so the cost of a diff is
//! proportional to what changed rather than to the size of either tree.

use std::cmp::Ordering;
use std::iter::FusedIterator;

use canopy_config::{log_diff_debug, log_diff_trace};
use serde::{Deserialize, Serialize};

use crate::codec::{path_order, Entry};
use crate::error::Result;
use crate::manifest::TreeManifest;
use crate::node::LazyTreeNode;
use crate::source::NodeSource;
use crate::walk::join_path;

/// A path present with different content on either side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub left: Option<Entry>,
    pub right: Option<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
}

impl DiffEntry {
    pub fn status(&self) -> DiffStatus {
        match (&self.left, &self.right) {
            (None, _) => DiffStatus::Added,
            (_, None) => DiffStatus::Removed,
            _ => DiffStatus::Modified,
        }
    }
}

/// One directory level on each side; either may be absent.
struct Frame {
    prefix: String,
    left: Option<(LazyTreeNode, Vec<usize>)>,
    right: Option<(LazyTreeNode, Vec<usize>)>,
    li: usize,
    ri: usize,
}

impl Frame {
    fn new(prefix: String, left: Option<LazyTreeNode>, right: Option<LazyTreeNode>) -> Self {
        let with_order = |node: LazyTreeNode| {
            let order = node.traversal_order();
            (node, order)
        };
        Self {
            prefix,
            left: left.map(with_order),
            right: right.map(with_order),
            li: 0,
            ri: 0,
        }
    }

    fn peek(side: &Option<(LazyTreeNode, Vec<usize>)>, pos: usize) -> Option<Cursor> {
        let (node, order) = side.as_ref()?;
        let index = *order.get(pos)?;
        Some(Cursor {
            node: node.clone(),
            index,
            entry: node.entry_at(index).clone(),
        })
    }
}

struct Cursor {
    node: LazyTreeNode,
    index: usize,
    entry: Entry,
}

impl Cursor {
    fn child(&self, source: &NodeSource) -> Result<Option<LazyTreeNode>> {
        self.node.child_at(self.index, source)
    }
}

enum Pick {
    Left(Cursor),
    Right(Cursor),
    Both(Cursor, Cursor),
}

enum Step {
    Emit(DiffEntry),
    Descend(Frame),
    Skip,
    Pop,
}

/// Iterator over [`DiffEntry`] values in full-path order.
///
/// Stops after the first error.
pub struct Diff {
    left_source: NodeSource,
    right_source: NodeSource,
    pending: Option<(TreeManifest, TreeManifest)>,
    stack: Vec<Frame>,
    pruned: usize,
    done: bool,
}

/// Lazily compare `left` against `right`.
pub fn diff(left: &TreeManifest, right: &TreeManifest) -> Diff {
    Diff {
        left_source: left.source().clone(),
        right_source: right.source().clone(),
        pending: Some((left.clone(), right.clone())),
        stack: Vec::new(),
        pruned: 0,
        done: false,
    }
}

impl Diff {
    /// Directory pairs skipped because their hashes matched.
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    fn start(&mut self, left: TreeManifest, right: TreeManifest) -> Result<()> {
        if left.root() == right.root() {
            log_diff_debug!(
                "Roots match, nothing to compare",
                root = tracing::field::display(left.root()),
            );
            self.pruned += 1;
            self.done = true;
            return Ok(());
        }
        let l = left.root_node()?;
        let r = right.root_node()?;
        self.stack.push(Frame::new(String::new(), Some(l), Some(r)));
        Ok(())
    }

    fn step(&mut self) -> Result<Step> {
        let Some(frame) = self.stack.last_mut() else {
            return Ok(Step::Pop);
        };
        let pick = match (
            Frame::peek(&frame.left, frame.li),
            Frame::peek(&frame.right, frame.ri),
        ) {
            (None, None) => return Ok(Step::Pop),
            (Some(l), None) => Pick::Left(l),
            (None, Some(r)) => Pick::Right(r),
            (Some(l), Some(r)) => match path_order(&l.entry, &r.entry) {
                Ordering::Less => Pick::Left(l),
                Ordering::Greater => Pick::Right(r),
                Ordering::Equal => Pick::Both(l, r),
            },
        };

        match pick {
            Pick::Left(l) => {
                frame.li += 1;
                let path = join_path(&frame.prefix, &l.entry.name);
                if l.entry.is_dir() {
                    let child = l.child(&self.left_source)?;
                    Ok(Step::Descend(Frame::new(path, child, None)))
                } else {
                    Ok(Step::Emit(DiffEntry {
                        path,
                        left: Some(l.entry),
                        right: None,
                    }))
                }
            }
            Pick::Right(r) => {
                frame.ri += 1;
                let path = join_path(&frame.prefix, &r.entry.name);
                if r.entry.is_dir() {
                    let child = r.child(&self.right_source)?;
                    Ok(Step::Descend(Frame::new(path, None, child)))
                } else {
                    Ok(Step::Emit(DiffEntry {
                        path,
                        left: None,
                        right: Some(r.entry),
                    }))
                }
            }
            Pick::Both(l, r) => {
                frame.li += 1;
                frame.ri += 1;
                let path = join_path(&frame.prefix, &l.entry.name);
                if l.entry.is_dir() {
                    if l.entry.hash == r.entry.hash {
                        log_diff_trace!("Pruned identical subtree", path = path.as_str());
                        self.pruned += 1;
                        return Ok(Step::Skip);
                    }
                    let lc = l.child(&self.left_source)?;
                    let rc = r.child(&self.right_source)?;
                    Ok(Step::Descend(Frame::new(path, lc, rc)))
                } else if l.entry == r.entry {
                    Ok(Step::Skip)
                } else {
                    Ok(Step::Emit(DiffEntry {
                        path,
                        left: Some(l.entry),
                        right: Some(r.entry),
                    }))
                }
            }
        }
    }
}

impl Iterator for Diff {
    type Item = Result<DiffEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some((left, right)) = self.pending.take() {
            if let Err(err) = self.start(left, right) {
                self.done = true;
                return Some(Err(err));
            }
            if self.done {
                return None;
            }
        }

        loop {
            match self.step() {
                Ok(Step::Emit(entry)) => return Some(Ok(entry)),
                Ok(Step::Descend(frame)) => self.stack.push(frame),
                Ok(Step::Skip) => {}
                Ok(Step::Pop) => {
                    if self.stack.pop().is_none() {
                        self.done = true;
                        log_diff_debug!("Diff complete", pruned = self.pruned);
                        return None;
                    }
                }
                Err(err) => {
                    self.done = true;
                    self.stack.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl FusedIterator for Diff {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EntryKind;
    use canopy_store::{MemoryStore, NodeHash, HASH_LEN};
    use std::sync::Arc;

    fn h(n: u8) -> NodeHash {
        NodeHash::from_bytes([n; HASH_LEN])
    }

    fn build(files: &[(&str, u8)]) -> TreeManifest {
        TreeManifest::from_files(
            Arc::new(MemoryStore::new()),
            files.iter().map(|(p, n)| (*p, h(*n), EntryKind::File)),
        )
        .unwrap()
    }

    fn paths(d: Diff) -> Vec<(String, DiffStatus)> {
        d.map(|r| {
            let e = r.unwrap();
            let status = e.status();
            (e.path, status)
        })
        .collect()
    }

    #[test]
    fn test_identical_is_empty() {
        let m = build(&[("a/b", 1)]);
        let mut d = m.diff(&m);
        assert!(d.next().is_none());
        assert_eq!(d.pruned(), 1);
    }

    #[test]
    fn test_added_removed_modified() {
        let left = build(&[("a/b", 1), ("c", 2), ("gone", 3)]);
        let right = build(&[("a/b", 9), ("c", 2), ("new/x", 4)]);
        assert_eq!(
            paths(left.diff(&right)),
            vec![
                ("a/b".to_string(), DiffStatus::Modified),
                ("gone".to_string(), DiffStatus::Removed),
                ("new/x".to_string(), DiffStatus::Added),
            ]
        );
    }

    #[test]
    fn test_kind_change_is_modification() {
        let left = build(&[("run", 1)]);
        let right = left.set("run", h(1), EntryKind::Executable).unwrap();
        let entries: Vec<_> = left.diff(&right).map(|r| r.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].left.as_ref().map(|e| e.kind), Some(EntryKind::File));
        assert_eq!(
            entries[0].right.as_ref().map(|e| e.kind),
            Some(EntryKind::Executable)
        );
    }

    #[test]
    fn test_file_becomes_directory() {
        let left = build(&[("a", 1), ("a-z", 2)]);
        let right = build(&[("a/inner", 3), ("a-z", 2)]);
        assert_eq!(
            paths(left.diff(&right)),
            vec![
                ("a".to_string(), DiffStatus::Removed),
                ("a/inner".to_string(), DiffStatus::Added),
            ]
        );
    }

    #[test]
    fn test_unchanged_sibling_is_pruned() {
        let left = build(&[("same/x", 1), ("same/y", 2), ("other/z", 3)]);
        let right = left.set("other/z", h(4), EntryKind::File).unwrap();
        let mut d = left.diff(&right);
        let first = d.next().unwrap().unwrap();
        assert_eq!(first.path, "other/z");
        assert!(d.next().is_none());
        assert_eq!(d.pruned(), 1);
    }

    #[test]
    fn test_status() {
        let e = Entry::file("x", h(1));
        let added = DiffEntry {
            path: "x".into(),
            left: None,
            right: Some(e.clone()),
        };
        assert_eq!(added.status(), DiffStatus::Added);
        let removed = DiffEntry {
            path: "x".into(),
            left: Some(e),
            right: None,
        };
        assert_eq!(removed.status(), DiffStatus::Removed);
    }
}
