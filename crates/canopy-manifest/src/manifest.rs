//! Path-level operations over a root node.

use std::fmt;
use std::sync::Arc;

use canopy_config::log_manifest_debug;
use canopy_store::{ContentStore, NodeHash};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::cache::NodeCache;
use crate::codec::{validate_name, Entry, EntryKind, EMPTY_TREE};
use crate::diff::{self, Diff};
use crate::error::{ManifestError, Result};
use crate::node::LazyTreeNode;
use crate::source::NodeSource;
use crate::walk::Walk;

/// A versioned directory tree identified by its root hash.
///
/// Every mutation returns a new manifest; the receiver keeps describing the
/// old tree and shares all unchanged nodes with the new one.
#[derive(Clone)]
pub struct TreeManifest {
    source: NodeSource,
    root_hash: NodeHash,
    root: Arc<OnceCell<LazyTreeNode>>,
}

/// Shape summary of a fully loaded tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub files: usize,
    pub executables: usize,
    pub symlinks: usize,
    pub directories: usize,
    /// Components in the longest path
    pub max_depth: usize,
}

impl ManifestStats {
    pub fn leaves(&self) -> usize {
        self.files + self.executables + self.symlinks
    }
}

impl TreeManifest {
    pub fn new(store: Arc<dyn ContentStore>, root: NodeHash) -> Self {
        Self::from_source(NodeSource::new(store), root)
    }

    /// A manifest with no entries.
    pub fn empty(store: Arc<dyn ContentStore>) -> Self {
        Self::from_node(NodeSource::new(store), LazyTreeNode::empty())
    }

    pub fn from_source(source: NodeSource, root: NodeHash) -> Self {
        let root = if root.is_null() { *EMPTY_TREE } else { root };
        Self {
            source,
            root_hash: root,
            root: Arc::new(OnceCell::new()),
        }
    }

    pub(crate) fn from_node(source: NodeSource, node: LazyTreeNode) -> Self {
        Self {
            source,
            root_hash: node.hash(),
            root: Arc::new(OnceCell::with_value(node)),
        }
    }

    /// Route node loads through `cache` from now on.
    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.source = self.source.with_cache(cache);
        self
    }

    /// Build a manifest by setting each `(path, hash, kind)` in turn.
    pub fn from_files<I, P>(store: Arc<dyn ContentStore>, files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, NodeHash, EntryKind)>,
        P: AsRef<str>,
    {
        files
            .into_iter()
            .try_fold(Self::empty(store), |manifest, (path, hash, kind)| {
                manifest.set(path.as_ref(), hash, kind)
            })
    }

    pub fn root(&self) -> NodeHash {
        self.root_hash
    }

    pub fn source(&self) -> &NodeSource {
        &self.source
    }

    /// The root node, loading it on first use.
    pub fn root_node(&self) -> Result<LazyTreeNode> {
        self.root
            .get_or_try_init(|| self.source.load(&self.root_hash))
            .cloned()
    }

    pub(crate) fn loaded_root(&self) -> Option<&LazyTreeNode> {
        self.root.get()
    }

    /// Look up the entry at `path`; files and directories alike.
    ///
    /// Only the nodes along the path are loaded.
    pub fn find(&self, path: &str) -> Result<Option<Entry>> {
        let components = split_path(path)?;
        let (last, dirs) = match components.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };
        match self.descend(dirs)? {
            Some(node) => Ok(node.get(last).cloned()),
            None => Ok(None),
        }
    }

    /// Node of the directory at `components`, or `None` if some component is
    /// missing or is not a directory.
    fn descend(&self, components: &[&str]) -> Result<Option<LazyTreeNode>> {
        let mut node = self.root_node()?;
        for name in components {
            match node.child(name, &self.source)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Directory node at `path`; an empty path is the root.
    fn resolve_dir(&self, path: &str) -> Result<Option<LazyTreeNode>> {
        let components = split_dir_path(path)?;
        self.descend(&components)
    }

    /// Map `path` to `hash`, creating parent directories as needed.
    ///
    /// Directories are set by hash and must not be the empty tree.
    pub fn set(&self, path: &str, hash: NodeHash, kind: EntryKind) -> Result<Self> {
        let components = split_path(path)?;
        if kind.is_dir() && (hash.is_null() || hash == *EMPTY_TREE) {
            return Err(ManifestError::EmptyDirectory(path.to_string()));
        }

        let root = self.root_node()?;
        let new_root = self.set_in(&root, &components, 0, hash, kind)?;
        log_manifest_debug!(
            "Set path",
            path = path,
            root = tracing::field::display(new_root.hash()),
        );
        Ok(Self::from_node(self.source.clone(), new_root))
    }

    fn set_in(
        &self,
        node: &LazyTreeNode,
        components: &[&str],
        depth: usize,
        hash: NodeHash,
        kind: EntryKind,
    ) -> Result<LazyTreeNode> {
        let name = components[depth];
        if depth + 1 == components.len() {
            return Ok(node.with_entry(Entry::new(name, hash, kind))?);
        }

        let child = match node.get(name) {
            None => LazyTreeNode::empty(),
            Some(entry) if entry.is_dir() => node.child(name, &self.source)?.unwrap_or_default(),
            Some(_) => {
                return Err(ManifestError::PathConflict {
                    path: components[..=depth].join("/"),
                })
            }
        };
        let new_child = self.set_in(&child, components, depth + 1, hash, kind)?;
        Ok(node.with_child(name, new_child)?)
    }

    /// Remove the file or directory at `path`.
    ///
    /// Directories left empty are removed from their parents in turn.
    /// Fails with [`ManifestError::NotFound`] if nothing is there.
    pub fn remove(&self, path: &str) -> Result<Self> {
        match self.try_remove(path)? {
            Some(manifest) => Ok(manifest),
            None => Err(ManifestError::NotFound(path.to_string())),
        }
    }

    /// Like [`remove`](Self::remove), but an absent path leaves the tree
    /// unchanged.
    pub fn remove_if_present(&self, path: &str) -> Result<Self> {
        Ok(self.try_remove(path)?.unwrap_or_else(|| self.clone()))
    }

    fn try_remove(&self, path: &str) -> Result<Option<Self>> {
        let components = split_path(path)?;
        let root = self.root_node()?;
        let removed = self.remove_in(&root, &components, 0)?;
        Ok(removed.map(|new_root| {
            log_manifest_debug!(
                "Removed path",
                path = path,
                root = tracing::field::display(new_root.hash()),
            );
            Self::from_node(self.source.clone(), new_root)
        }))
    }

    /// `None` when the path does not exist below `node`.
    fn remove_in(
        &self,
        node: &LazyTreeNode,
        components: &[&str],
        depth: usize,
    ) -> Result<Option<LazyTreeNode>> {
        let name = components[depth];
        if depth + 1 == components.len() {
            return Ok(node.without_entry(name));
        }

        let Some(child) = node.child(name, &self.source)? else {
            return Ok(None);
        };
        match self.remove_in(&child, components, depth + 1)? {
            None => Ok(None),
            Some(new_child) if new_child.is_empty() => Ok(node.without_entry(name)),
            Some(new_child) => Ok(Some(node.with_child(name, new_child)?)),
        }
    }

    /// Every non-directory entry in full-path order.
    pub fn walk(&self) -> Walk {
        Walk::new(self.clone())
    }

    /// Like [`walk`](Self::walk), restricted to the directory at `dir`.
    /// Paths yielded are still relative to the root.
    pub fn walk_prefix(&self, dir: &str) -> Result<Walk> {
        let components = split_dir_path(dir)?;
        Ok(match self.descend(&components)? {
            Some(node) => Walk::from_node(self.source.clone(), node, components.join("/")),
            None => Walk::empty(self.source.clone()),
        })
    }

    /// Direct entries of the directory at `path`, in name order.
    pub fn list_dir(&self, path: &str) -> Result<Option<Vec<Entry>>> {
        Ok(self
            .resolve_dir(path)?
            .map(|node| node.entries().cloned().collect()))
    }

    pub fn has_dir(&self, path: &str) -> Result<bool> {
        Ok(self.resolve_dir(path)?.is_some())
    }

    /// Count entries by kind. Loads the whole tree.
    pub fn stats(&self) -> Result<ManifestStats> {
        let mut stats = ManifestStats::default();
        self.collect_stats(&self.root_node()?, 1, &mut stats)?;
        Ok(stats)
    }

    fn collect_stats(
        &self,
        node: &LazyTreeNode,
        depth: usize,
        stats: &mut ManifestStats,
    ) -> Result<()> {
        if !node.is_empty() {
            stats.max_depth = stats.max_depth.max(depth);
        }
        for entry in node.entries() {
            match entry.kind {
                EntryKind::File => stats.files += 1,
                EntryKind::Executable => stats.executables += 1,
                EntryKind::Symlink => stats.symlinks += 1,
                EntryKind::Directory => {
                    stats.directories += 1;
                    if let Some(child) = node.child(&entry.name, &self.source)? {
                        self.collect_stats(&child, depth + 1, stats)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Changes needed to turn `self` into `other`.
    pub fn diff(&self, other: &TreeManifest) -> Diff {
        diff::diff(self, other)
    }
}

impl fmt::Debug for TreeManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeManifest")
            .field("root", &self.root_hash)
            .field("loaded", &self.root.get().is_some())
            .finish()
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> ManifestError {
    ManifestError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Split a `/`-separated path; leading and trailing separators are ignored.
fn split_dir_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|component| {
            validate_name(component)
                .map(|()| component)
                .map_err(|reason| invalid(path, reason))
        })
        .collect()
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let components = split_dir_path(path)?;
    if components.is_empty() {
        return Err(invalid(path, "empty path"));
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_store::{MemoryStore, HASH_LEN};

    fn h(n: u8) -> NodeHash {
        NodeHash::from_bytes([n; HASH_LEN])
    }

    fn sample() -> TreeManifest {
        TreeManifest::from_files(
            Arc::new(MemoryStore::new()),
            [
                ("a/b.txt", h(1), EntryKind::File),
                ("a/c.txt", h(2), EntryKind::File),
                ("d.txt", h(3), EntryKind::File),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a/b/").unwrap(), vec!["a", "b"]);
        assert!(split_path("").is_err());
        assert!(split_path("/").is_err());
        assert!(split_path("a//b").is_err());
        assert!(split_path("a/../b").is_err());
        assert!(split_dir_path("").unwrap().is_empty());
    }

    #[test]
    fn test_find_files_and_dirs() {
        let m = sample();
        assert_eq!(m.find("a/b.txt").unwrap().map(|e| e.hash), Some(h(1)));
        assert!(m.find("a").unwrap().unwrap().is_dir());
        assert!(m.find("a/missing").unwrap().is_none());
        assert!(m.find("d.txt/below").unwrap().is_none());
        assert!(m.find("x/y/z").unwrap().is_none());
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let m = sample();
        assert!(matches!(
            m.set("", h(1), EntryKind::File),
            Err(ManifestError::InvalidPath { .. })
        ));
        assert!(matches!(m.find("//"), Err(ManifestError::InvalidPath { .. })));
        assert!(matches!(m.remove("/"), Err(ManifestError::InvalidPath { .. })));
    }

    #[test]
    fn test_set_through_file_conflicts() {
        let m = sample();
        match m.set("d.txt/e", h(9), EntryKind::File) {
            Err(ManifestError::PathConflict { path }) => assert_eq!(path, "d.txt"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_set_empty_directory_rejected() {
        let m = sample();
        assert!(matches!(
            m.set("e", *EMPTY_TREE, EntryKind::Directory),
            Err(ManifestError::EmptyDirectory(_))
        ));
    }

    #[test]
    fn test_set_same_value_keeps_root() {
        let m = sample();
        let again = m.set("a/b.txt", h(1), EntryKind::File).unwrap();
        assert_eq!(m.root(), again.root());
    }

    #[test]
    fn test_file_replaces_directory() {
        let m = sample().set("a", h(5), EntryKind::File).unwrap();
        assert_eq!(m.find("a").unwrap().map(|e| e.kind), Some(EntryKind::File));
        assert!(m.find("a/b.txt").unwrap().is_none());
    }

    #[test]
    fn test_remove_cascades_empty_dirs() {
        let m = TreeManifest::empty(Arc::new(MemoryStore::new()))
            .set("x/y/z.txt", h(1), EntryKind::File)
            .unwrap()
            .set("top.txt", h(2), EntryKind::File)
            .unwrap();
        let removed = m.remove("x/y/z.txt").unwrap();
        assert!(removed.find("x").unwrap().is_none());
        assert!(removed.find("x/y").unwrap().is_none());
        assert_eq!(
            removed.list_dir("").unwrap().unwrap(),
            vec![Entry::file("top.txt", h(2))]
        );
    }

    #[test]
    fn test_remove_absent() {
        let m = sample();
        assert!(m.remove("nope").unwrap_err().is_not_found());
        assert!(m.remove("d.txt/x").unwrap_err().is_not_found());
        let same = m.remove_if_present("a/nope").unwrap();
        assert_eq!(same.root(), m.root());
    }

    #[test]
    fn test_remove_whole_directory() {
        let m = sample().remove("a").unwrap();
        let paths: Vec<_> = m.walk().map(|r| r.unwrap().0).collect();
        assert_eq!(paths, vec!["d.txt"]);
    }

    #[test]
    fn test_list_dir_and_has_dir() {
        let m = sample();
        let names: Vec<_> = m
            .list_dir("a")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.txt", "c.txt"]);
        assert!(m.list_dir("d.txt").unwrap().is_none());
        assert!(m.has_dir("/a/").unwrap());
        assert!(m.has_dir("").unwrap());
        assert!(!m.has_dir("d.txt").unwrap());
    }

    #[test]
    fn test_stats() {
        let m = sample()
            .set("a/run", h(4), EntryKind::Executable)
            .unwrap()
            .set("a/deep/link", h(5), EntryKind::Symlink)
            .unwrap();
        let stats = m.stats().unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.executables, 1);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.max_depth, 3);
        assert_eq!(stats.leaves(), 5);

        let empty = TreeManifest::empty(Arc::new(MemoryStore::new()));
        assert_eq!(empty.stats().unwrap(), ManifestStats::default());
    }

    #[test]
    fn test_null_root_is_empty_tree() {
        let m = TreeManifest::new(Arc::new(MemoryStore::new()), NodeHash::NULL);
        assert_eq!(m.root(), *EMPTY_TREE);
        assert_eq!(m.walk().count(), 0);
    }
}
