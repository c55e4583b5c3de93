//! Parallel batch writes using Rayon
//!
//! Node blobs are small and independent, so batch writes fan out across a
//! bounded pool. The pool is capped to leave cores for the caller.

use std::io;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use crate::{NodeHash, Result, StoreError};

/// Maximum threads used for a batch write
pub const MAX_WRITE_THREADS: usize = 4;

/// Default thread count: min(cpu_cores / 2, MAX_WRITE_THREADS)
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).clamp(1, MAX_WRITE_THREADS)
}

fn create_thread_pool(threads: Option<usize>) -> Result<ThreadPool> {
    let num_threads = threads.unwrap_or_else(default_thread_count).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("canopy-write-{}", i))
        .build()
        .map_err(|e| StoreError::Io(io::Error::other(e)))
}

/// Run `write` over every blob on a dedicated pool, preserving input order.
///
/// The first error wins; blobs already written stay written (writes are
/// idempotent).
pub(crate) fn parallel_put<F>(
    blobs: &[Vec<u8>],
    threads: Option<usize>,
    write: F,
) -> Result<Vec<NodeHash>>
where
    F: Fn(&[u8]) -> Result<NodeHash> + Send + Sync,
{
    if blobs.len() <= 1 {
        return blobs.iter().map(|b| write(b.as_slice())).collect();
    }

    let pool = create_thread_pool(threads)?;
    debug!(
        blobs = blobs.len(),
        threads = pool.current_num_threads(),
        "Parallel batch write"
    );
    pool.install(|| blobs.par_iter().map(|b| write(b.as_slice())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_hash;

    #[test]
    fn test_default_thread_count_bounds() {
        let n = default_thread_count();
        assert!(n >= 1);
        assert!(n <= MAX_WRITE_THREADS);
    }

    #[test]
    fn test_parallel_put_preserves_order() {
        let blobs: Vec<Vec<u8>> = (0..32).map(|i| format!("blob {}", i).into_bytes()).collect();
        let hashes = parallel_put(&blobs, Some(3), |b| Ok(compute_hash(b))).unwrap();
        let expected: Vec<_> = blobs.iter().map(|b| compute_hash(b)).collect();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn test_parallel_put_propagates_error() {
        let blobs: Vec<Vec<u8>> = vec![b"ok".to_vec(), b"bad".to_vec(), b"ok2".to_vec()];
        let result = parallel_put(&blobs, Some(2), |b| {
            if b == b"bad" {
                Err(StoreError::InvalidHash("bad".into()))
            } else {
                Ok(compute_hash(b))
            }
        });
        assert!(result.is_err());
    }
}
