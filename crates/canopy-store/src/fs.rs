//! On-disk node store with a 2-level fan-out layout.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace};

use crate::batch::parallel_put;
use crate::{compute_hash, ContentStore, NodeHash, Result, StoreError, WritableStore};

/// Filesystem-backed node store.
///
/// Blobs are stored under `nodes/ab/cd/<hex>` where `ab` and `cd` are the
/// first two bytes of the hash.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    verify_on_read: bool,
    write_threads: Option<usize>,
}

impl FsStore {
    /// Open a store at the given root directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            verify_on_read: true,
            write_threads: None,
        })
    }

    /// Toggle digest verification on every fetch (enabled by default).
    pub fn with_verify_on_read(mut self, verify: bool) -> Self {
        self.verify_on_read = verify;
        self
    }

    /// Thread count for [`WritableStore::put_batch`]. `None` = auto.
    pub fn with_write_threads(mut self, threads: Option<usize>) -> Self {
        self.write_threads = threads;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &NodeHash) -> PathBuf {
        let hex = hash.to_hex();
        let l1 = &hex[..2];
        let l2 = &hex[2..4];
        self.root.join("nodes").join(l1).join(l2).join(&hex)
    }

    /// Path of a stored blob, if present.
    pub fn blob_path_for_hash(&self, hash: &NodeHash) -> Option<PathBuf> {
        let path = self.blob_path(hash);
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    fn write_blob(&self, data: &[u8]) -> Result<NodeHash> {
        let hash = compute_hash(data);
        let path = self.blob_path(&hash);

        if path.exists() {
            trace!(hash = %hash, "Node already stored");
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Unique temp name per process/thread so parallel writers never collide
        let temp_path = path.with_file_name(format!(
            "{}.{}.{:?}.tmp",
            hash.to_hex(),
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            if path.exists() {
                return Ok(hash);
            }
            return Err(StoreError::Io(e));
        }

        Ok(hash)
    }

    /// Delete a stored node.
    pub fn delete(&self, hash: &NodeHash) -> Result<()> {
        let path = self.blob_path(hash);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(())
        } else {
            Err(StoreError::NotFound { hash: *hash })
        }
    }

    /// Count stored nodes and bytes.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for hash in self.iter()? {
            let hash = hash?;
            stats.node_count += 1;
            stats.total_bytes += fs::metadata(self.blob_path(&hash))?.len();
        }
        Ok(stats)
    }

    /// Iterate over all stored hashes (unordered).
    pub fn iter(&self) -> Result<FsStoreIter> {
        let nodes_dir = self.root.join("nodes");
        let l1_iter = if nodes_dir.exists() {
            Some(fs::read_dir(&nodes_dir)?)
        } else {
            None
        };
        Ok(FsStoreIter {
            l1_iter,
            l2_iter: None,
            l3_iter: None,
        })
    }
}

impl ContentStore for FsStore {
    #[instrument(skip(self), level = "debug")]
    fn fetch(&self, hash: &NodeHash) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { hash: *hash });
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if self.verify_on_read {
            let actual = compute_hash(&data);
            if actual != *hash {
                return Err(StoreError::HashMismatch {
                    expected: *hash,
                    actual,
                });
            }
        }

        Ok(data)
    }

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        Ok(self.blob_path(hash).exists())
    }
}

impl WritableStore for FsStore {
    #[instrument(skip(self, data), level = "debug", fields(len = data.len()))]
    fn put(&self, data: &[u8]) -> Result<NodeHash> {
        self.write_blob(data)
    }

    fn put_batch(&self, blobs: &[Vec<u8>]) -> Result<Vec<NodeHash>> {
        let hashes = parallel_put(blobs, self.write_threads, |b| self.write_blob(b))?;
        debug!(count = hashes.len(), "Stored node batch");
        Ok(hashes)
    }
}

/// Statistics about an [`FsStore`]
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub node_count: u64,
    pub total_bytes: u64,
}

impl StoreStats {
    pub fn avg_node_size(&self) -> u64 {
        if self.node_count == 0 {
            0
        } else {
            self.total_bytes / self.node_count
        }
    }
}

/// Iterator over stored hashes (nodes/ab/cd/hash)
pub struct FsStoreIter {
    l1_iter: Option<fs::ReadDir>,
    l2_iter: Option<fs::ReadDir>,
    l3_iter: Option<fs::ReadDir>,
}

impl Iterator for FsStoreIter {
    type Item = Result<NodeHash>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(ref mut l3) = self.l3_iter {
                match l3.next() {
                    Some(Ok(entry)) => {
                        let path = entry.path();
                        if path.extension().is_some_and(|ext| ext == "tmp") {
                            continue;
                        }
                        if let Some(hash) = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .and_then(NodeHash::from_hex)
                        {
                            return Some(Ok(hash));
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(StoreError::Io(e))),
                    None => self.l3_iter = None,
                }
            }

            if let Some(ref mut l2) = self.l2_iter {
                match l2.next() {
                    Some(Ok(entry)) => {
                        if entry.path().is_dir() {
                            match fs::read_dir(entry.path()) {
                                Ok(iter) => self.l3_iter = Some(iter),
                                Err(e) => return Some(Err(StoreError::Io(e))),
                            }
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(StoreError::Io(e))),
                    None => self.l2_iter = None,
                }
            }

            match self.l1_iter.as_mut()?.next() {
                Some(Ok(entry)) => {
                    if entry.path().is_dir() {
                        match fs::read_dir(entry.path()) {
                            Ok(iter) => self.l2_iter = Some(iter),
                            Err(e) => return Some(Err(StoreError::Io(e))),
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(StoreError::Io(e))),
                None => return None,
            }
        }
    }
}
