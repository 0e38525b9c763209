use super::now_millis;
use super::sqlite::Database;
use crate::error::Error;
use std::time::Duration;
use tracing::{debug, warn};

/// Exclusive claim on one scan, released on drop.
///
/// Two workers never drive the same scan. A lock older than the stale window is
/// assumed to belong to a worker that died and is taken over.
pub struct ScanLock<'a> {
    db: &'a Database,
    scan_id: i64,
    owner: String,
}

impl<'a> ScanLock<'a> {
    pub fn acquire(db: &'a Database, scan_id: i64, stale_after: Duration) -> Result<Self, Error> {
        let now = now_millis();
        let owner = format!("{}:{}", std::process::id(), now);
        let stale_window = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
        let stale_before = now.saturating_sub(stale_window);

        let acquired = db.transaction(|db| Ok(db.try_lock_scan(scan_id, &owner, stale_before)?))?;
        if !acquired {
            return Err(Error::ScanLocked(scan_id));
        }
        debug!("Scan {} locked by {}", scan_id, owner);
        Ok(Self { db, scan_id, owner })
    }
}

impl Drop for ScanLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.db.release_scan_lock(self.scan_id, &self.owner) {
            warn!("Failed to release lock on scan {}: {}", self.scan_id, e);
        }
    }
}
