use crate::storage::models::ScanState;

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A scan is about to run the action that leaves `from`.
    fn on_phase_start(&self, _scan_id: i64, _from: ScanState) {}
    /// The action committed and the scan now rests in `to`.
    fn on_phase_complete(&self, _scan_id: i64, _to: ScanState, _duration_secs: f64) {}
    fn on_ingest_progress(&self, _folders: i64, _files: i64, _current_path: &str) {}
    fn on_hash_start(&self, _total_files: u64) {}
    fn on_hash_progress(&self, _files_hashed: u64, _total_files: u64) {}
    fn on_hash_complete(&self, _hashed: u64, _failed: u64, _duration_secs: f64) {}
    fn on_scan_failed(&self, _scan_id: i64, _message: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
