use crate::error::Error;
use crate::hasher::ContentHasher;
use crate::storage::models::{NodeKind, NodeState};
use crate::storage::Database;
use tracing::{debug, info, trace};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FolderPhaseSummary {
    pub passes: usize,
    pub duplicate_by_subitem: usize,
    pub unique_by_subitem: usize,
}

/// Classify every Pending folder, leaves first.
///
/// A folder whose direct children are all duplicates (by hash or by subitem) is
/// `DuplicateBySubitem` and gets the combined digest of its children in path
/// order. Anything else, including an empty folder, is `UniqueBySubitem`.
pub fn classify_folders(db: &Database, scan_id: i64) -> Result<FolderPhaseSummary, Error> {
    let mut summary = FolderPhaseSummary::default();

    loop {
        let remaining = db.count_nodes(scan_id, NodeKind::Folder, NodeState::Pending)?;
        if remaining == 0 {
            break;
        }

        let ready = db.folders_ready_for_classification(scan_id)?;
        if ready.is_empty() {
            return Err(Error::Unresolvable { scan_id, remaining });
        }

        db.transaction(|db| {
            for tally in &ready {
                if tally.is_all_duplicate() {
                    let digests = db.child_digests(tally.folder_id)?;
                    let digest = ContentHasher::combine(&digests);
                    trace!("Folder {} duplicate -> {}", tally.folder_id, digest);
                    db.mark_folder(tally.folder_id, NodeState::DuplicateBySubitem, Some(&digest))?;
                    summary.duplicate_by_subitem += 1;
                } else {
                    db.mark_folder(tally.folder_id, NodeState::UniqueBySubitem, None)?;
                    summary.unique_by_subitem += 1;
                }
            }
            Ok(())
        })?;

        summary.passes += 1;
        debug!(
            "Scan {}: folder pass {} classified {} of {} folders",
            scan_id,
            summary.passes,
            ready.len(),
            remaining
        );
    }

    info!(
        "Scan {}: {} duplicate folders, {} unique folders in {} passes",
        scan_id, summary.duplicate_by_subitem, summary.unique_by_subitem, summary.passes
    );
    Ok(summary)
}
