use super::content::ContentHasher;
use crate::error::Error;
use crate::storage::models::{Digest, FsObject};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::io;
use std::path::Path;

/// Digest result for one file node.
#[derive(Debug)]
pub struct HashOutcome {
    pub node_id: i64,
    pub result: io::Result<Digest>,
}

/// Bounded worker pool for per-file hashing, the only cross-file parallel step.
pub struct HashPool {
    pool: ThreadPool,
    hasher: ContentHasher,
}

impl HashPool {
    /// `workers == 0` lets rayon pick the available parallelism.
    pub fn new(workers: usize, hasher: ContentHasher) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("hash-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("failed to build hashing pool: {}", e)))?;
        Ok(Self { pool, hasher })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Hash every file in `batch`. Outcomes come back in batch order.
    pub fn hash_batch(&self, batch: &[FsObject]) -> Vec<HashOutcome> {
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|node| HashOutcome {
                    node_id: node.id,
                    result: self.hasher.digest_of(Path::new(&node.full_path)),
                })
                .collect()
        })
    }
}
