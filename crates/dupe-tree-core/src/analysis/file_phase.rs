use crate::error::Error;
use crate::hasher::HashPool;
use crate::progress::ProgressReporter;
use crate::storage::models::{NodeKind, NodeState};
use crate::storage::{Cardinality, Database, GroupColumn, NodeFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilePhaseSummary {
    pub unique_by_size: usize,
    pub hashed: usize,
    pub hash_failed: usize,
    pub duplicate_by_hash: usize,
    pub unique_by_hash: usize,
}

/// Classify every Pending file of a scan:
/// 1. Files with a size no other file has are unique without being read.
/// 2. The rest are hashed on the pool, one applied transaction per batch.
/// 3. Hashed files sharing a digest are duplicates.
/// 4. The remaining hashed files are unique by hash.
///
/// Files that cannot be read end in `HashFailed` with the error recorded.
pub fn classify_files(
    db: &Database,
    scan_id: i64,
    pool: &HashPool,
    batch_size: usize,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<FilePhaseSummary, Error> {
    let mut summary = FilePhaseSummary {
        unique_by_size: db.bulk_update_state(
            scan_id,
            NodeKind::File,
            NodeState::Pending,
            NodeState::UniqueBySize,
            NodeFilter::grouped(GroupColumn::Size, Cardinality::Exactly(1)),
        )?,
        ..FilePhaseSummary::default()
    };

    let total = db.count_nodes(scan_id, NodeKind::File, NodeState::Pending)? as u64;
    info!(
        "Scan {}: {} files unique by size, hashing {} on {} workers",
        scan_id,
        summary.unique_by_size,
        total,
        pool.workers()
    );
    reporter.on_hash_start(total);
    let hash_start = Instant::now();

    let batch_size = batch_size.max(1) as i64;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let batch = db.fetch_nodes(scan_id, NodeKind::File, NodeState::Pending, batch_size)?;
        if batch.is_empty() {
            break;
        }

        let outcomes = pool.hash_batch(&batch);
        let applied = db.transaction(|db| {
            let mut applied = 0;
            for (node, outcome) in batch.iter().zip(&outcomes) {
                match &outcome.result {
                    Ok(digest) => {
                        trace!("{} -> {}", node.full_path, digest);
                        applied += db.set_file_digest(outcome.node_id, digest)?;
                        summary.hashed += 1;
                    }
                    Err(e) => {
                        warn!("Could not hash {}: {}", node.full_path, e);
                        applied += db.mark_hash_failed(outcome.node_id, &e.to_string())?;
                        summary.hash_failed += 1;
                    }
                }
            }
            Ok(applied)
        })?;
        if applied == 0 {
            return Err(Error::Unresolvable {
                scan_id,
                remaining: db.count_nodes(scan_id, NodeKind::File, NodeState::Pending)?,
            });
        }

        let done = (summary.hashed + summary.hash_failed) as u64;
        debug!("Scan {}: hashed {}/{} files", scan_id, done, total);
        reporter.on_hash_progress(done, total);
    }
    reporter.on_hash_complete(
        summary.hashed as u64,
        summary.hash_failed as u64,
        hash_start.elapsed().as_secs_f64(),
    );

    summary.duplicate_by_hash = db.bulk_update_state(
        scan_id,
        NodeKind::File,
        NodeState::HashComputed,
        NodeState::DuplicateByHash,
        NodeFilter::grouped(GroupColumn::Digest, Cardinality::AtLeast(2)),
    )?;
    summary.unique_by_hash = db.bulk_update_state(
        scan_id,
        NodeKind::File,
        NodeState::HashComputed,
        NodeState::UniqueByHash,
        NodeFilter::All,
    )?;

    info!(
        "Scan {}: {} duplicate files, {} unique by hash, {} unreadable",
        scan_id, summary.duplicate_by_hash, summary.unique_by_hash, summary.hash_failed
    );
    Ok(summary)
}
