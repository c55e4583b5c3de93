//! Node loading: store fetch, digest check, decode, cache.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use canopy_config::{
    log_manifest_trace, log_manifest_warn, log_store_debug, log_store_warn,
    path::resolve_store_root, Config,
};
use canopy_store::{ContentStore, FsStore, NodeHash};

use crate::cache::NodeCache;
use crate::codec::{self, EMPTY_TREE};
use crate::error::{DecodeError, ManifestError, Result};
use crate::node::LazyTreeNode;

/// Where manifests get their nodes from.
///
/// Cheap to clone; clones share the store and cache.
#[derive(Clone)]
pub struct NodeSource {
    store: Arc<dyn ContentStore>,
    cache: Option<Arc<NodeCache>>,
    verify: bool,
}

impl NodeSource {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            cache: None,
            verify: true,
        }
    }

    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Re-hash fetched bytes before decoding (on by default).
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Source over `store` with cache and verification taken from `config`.
    pub fn from_config(store: Arc<dyn ContentStore>, config: &Config) -> Self {
        let source = Self::new(store).with_verify(config.store.verify_on_read);
        if config.cache.enabled {
            source.with_cache(Arc::new(NodeCache::new(config.cache.max_nodes)))
        } else {
            source
        }
    }

    /// Like [`from_config`](Self::from_config) with the process-wide config.
    pub fn from_global_config(store: Arc<dyn ContentStore>) -> Self {
        Self::from_config(store, canopy_config::config())
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<NodeCache>> {
        self.cache.as_ref()
    }

    /// Fetch and decode the node for `hash`.
    ///
    /// The empty tree and the null hash never reach the store.
    pub fn load(&self, hash: &NodeHash) -> Result<LazyTreeNode> {
        if hash.is_null() || *hash == *EMPTY_TREE {
            return Ok(LazyTreeNode::empty());
        }
        if let Some(node) = self.cache.as_ref().and_then(|c| c.get(hash)) {
            return Ok(node);
        }

        let bytes = self.store.fetch(hash).map_err(|source| {
            if source.is_retryable() {
                log_store_warn!(
                    "Node fetch failed, retryable",
                    hash = tracing::field::display(hash),
                    error = tracing::field::display(&source),
                );
            } else {
                log_store_debug!(
                    "Node fetch failed",
                    hash = tracing::field::display(hash),
                    error = tracing::field::display(&source),
                );
            }
            ManifestError::StoreFetch {
                hash: *hash,
                source,
            }
        })?;

        if self.verify {
            let actual = codec::hash_bytes(&bytes);
            if actual != *hash {
                log_manifest_warn!(
                    "Node digest mismatch",
                    expected = tracing::field::display(hash),
                    actual = tracing::field::display(actual),
                );
                return Err(ManifestError::Decode {
                    hash: *hash,
                    source: DecodeError::HashMismatch {
                        expected: *hash,
                        actual,
                    },
                });
            }
        }

        let entries = codec::decode(&bytes).map_err(|source| {
            log_manifest_warn!(
                "Undecodable node",
                hash = tracing::field::display(hash),
                error = tracing::field::display(&source),
            );
            ManifestError::Decode {
                hash: *hash,
                source,
            }
        })?;
        log_manifest_trace!(
            "Loaded node",
            hash = tracing::field::display(hash),
            entries = entries.len(),
        );

        let node = LazyTreeNode::from_decoded(*hash, entries);
        if let Some(cache) = &self.cache {
            cache.insert(&node);
        }
        Ok(node)
    }
}

impl fmt::Debug for NodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSource")
            .field("cache", &self.cache)
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

/// Open the on-disk store described by `config`.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<FsStore>> {
    let root = resolve_store_root(&config.store.root)?;
    let store = FsStore::new(&root)
        .with_context(|| format!("Failed to open node store at {}", root.display()))?
        .with_verify_on_read(config.store.verify_on_read)
        .with_write_threads(config.store.write_threads);
    Ok(Arc::new(store))
}
