use crate::error::Error;
use crate::storage::Database;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeSummary {
    pub passes: usize,
    pub folders_updated: usize,
}

/// Resolve every folder of unknown size to the sum of its direct children.
///
/// Each pass sizes the folders whose children are all known, so sizes settle one
/// tree level per pass from the leaves up. A resolved tree costs one count query
/// and no updates.
pub fn aggregate_folder_sizes(db: &Database, scan_id: i64) -> Result<SizeSummary, Error> {
    let mut summary = SizeSummary::default();

    loop {
        let remaining = db.count_unknown_size_folders(scan_id)?;
        if remaining == 0 {
            break;
        }

        let ready = db.folders_ready_for_size(scan_id)?;
        if ready.is_empty() {
            return Err(Error::Unresolvable { scan_id, remaining });
        }

        db.transaction(|db| {
            for (folder_id, size) in &ready {
                db.update_folder_size(*folder_id, *size)?;
            }
            Ok(())
        })?;

        summary.passes += 1;
        summary.folders_updated += ready.len();
        debug!(
            "Scan {}: size pass {} resolved {} of {} folders",
            scan_id,
            summary.passes,
            ready.len(),
            remaining
        );
    }

    info!(
        "Scan {}: sized {} folders in {} passes",
        scan_id, summary.folders_updated, summary.passes
    );
    Ok(summary)
}
