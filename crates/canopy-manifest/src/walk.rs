//! Depth-first traversal that loads directories as it enters them.

use std::iter::FusedIterator;

use crate::codec::Entry;
use crate::error::Result;
use crate::manifest::TreeManifest;
use crate::node::LazyTreeNode;
use crate::source::NodeSource;

struct Frame {
    node: LazyTreeNode,
    prefix: String,
    order: Vec<usize>,
    pos: usize,
}

impl Frame {
    fn new(node: LazyTreeNode, prefix: String) -> Self {
        let order = node.traversal_order();
        Self {
            node,
            prefix,
            order,
            pos: 0,
        }
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        let mut path = String::with_capacity(prefix.len() + 1 + name.len());
        path.push_str(prefix);
        path.push('/');
        path.push_str(name);
        path
    }
}

/// Iterator over `(path, entry)` for every file, executable and symlink.
///
/// Nothing is loaded until the first call to `next`. After an error the
/// iterator is exhausted.
pub struct Walk {
    source: NodeSource,
    pending: Option<TreeManifest>,
    stack: Vec<Frame>,
    done: bool,
}

impl Walk {
    pub(crate) fn new(manifest: TreeManifest) -> Self {
        Self {
            source: manifest.source().clone(),
            pending: Some(manifest),
            stack: Vec::new(),
            done: false,
        }
    }

    pub(crate) fn from_node(source: NodeSource, node: LazyTreeNode, prefix: String) -> Self {
        Self {
            source,
            pending: None,
            stack: vec![Frame::new(node, prefix)],
            done: false,
        }
    }

    pub(crate) fn empty(source: NodeSource) -> Self {
        Self {
            source,
            pending: None,
            stack: Vec::new(),
            done: true,
        }
    }

    fn fail<T>(&mut self, err: crate::ManifestError) -> Option<Result<T>> {
        self.done = true;
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for Walk {
    type Item = Result<(String, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(manifest) = self.pending.take() {
            match manifest.root_node() {
                Ok(root) => self.stack.push(Frame::new(root, String::new())),
                Err(err) => return self.fail(err),
            }
        }

        loop {
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => {
                    self.done = true;
                    return None;
                }
            };
            let Some(&index) = frame.order.get(frame.pos) else {
                self.stack.pop();
                continue;
            };
            frame.pos += 1;

            let entry = frame.node.entry_at(index).clone();
            let path = join_path(&frame.prefix, &entry.name);
            if !entry.is_dir() {
                return Some(Ok((path, entry)));
            }

            match frame.node.child_at(index, &self.source) {
                Ok(Some(child)) => self.stack.push(Frame::new(child, path)),
                Ok(None) => {}
                Err(err) => return self.fail(err),
            }
        }
    }
}

impl FusedIterator for Walk {}
