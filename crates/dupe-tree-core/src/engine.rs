use crate::analysis;
use crate::config::AppConfig;
use crate::error::Error;
use crate::hasher::{ContentHasher, HashPool};
use crate::progress::ProgressReporter;
use crate::scanner::{self, TreeIngestor};
use crate::storage::models::{Scan, ScanState};
use crate::storage::{Database, RetryPolicy, ScanLock};
use glob::Pattern;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Drives scans through `Pending -> Scanned -> FolderSizeUpdated ->
/// DuplicateFolderMarked -> Completed`.
///
/// A state is persisted only after the action leading to it has committed, so a
/// crash leaves the scan at its last completed state and the interrupted action
/// is redone on the next run.
pub struct ScanEngine {
    config: AppConfig,
    db_path: String,
    cancel_token: Arc<AtomicBool>,
}

/// How far one scan got during `process_pending_scans`.
#[derive(Debug)]
pub struct ScanOutcome {
    pub scan_id: i64,
    pub final_state: ScanState,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Display label of a scan state.
pub fn readable_state(state: ScanState) -> &'static str {
    state.label()
}

/// Everything an action needs besides the scan itself.
struct PhaseContext<'a> {
    db: &'a Database,
    pool: &'a HashPool,
    ignore_patterns: &'a [Pattern],
    reporter: &'a dyn ProgressReporter,
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = config.db_path.clone();
        Self {
            config,
            db_path,
            cancel_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = path.to_string();
        self
    }

    /// Setting the token stops processing at the next phase or hashing-batch boundary.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_token)
    }

    pub fn open_database(&self) -> Result<Database, Error> {
        Ok(Database::open(&self.db_path)?)
    }

    /// Queue a new scan of `root_path`. Nothing is read until it is processed.
    pub fn create_scan(&self, name: &str, root_path: &str) -> Result<i64, Error> {
        let db = self.open_database()?;
        let scan_id = self
            .retry_policy()
            .run("create scan", || Ok(db.insert_scan(name, root_path)?))?;
        info!("Created a new scan with id: {} ('{}' at {})", scan_id, name, root_path);
        Ok(scan_id)
    }

    /// Run the state machine for every scan not yet Completed, oldest first.
    ///
    /// A failing scan is logged and recorded in its outcome, and the loop moves on.
    /// Cancellation stops the loop and is returned as `Error::Cancelled`.
    pub fn process_pending_scans(
        &self,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<ScanOutcome>, Error> {
        let db = self.open_database()?;
        let retry = self.retry_policy();
        let scans = retry.run("list pending scans", || Ok(db.scans_not_completed()?))?;
        if scans.is_empty() {
            info!("No pending scans");
            return Ok(Vec::new());
        }

        let pool = HashPool::new(
            self.config.hash_workers,
            ContentHasher::new(self.config.hash_chunk_size),
        )?;
        let ignore_patterns = scanner::compile_ignore_patterns(&self.config.ingest_ignore_patterns);
        let ctx = PhaseContext {
            db: &db,
            pool: &pool,
            ignore_patterns: &ignore_patterns,
            reporter,
        };

        let mut outcomes = Vec::with_capacity(scans.len());
        for scan in scans {
            info!(
                "Found pending scan: {} => {} '{}' '{}'",
                scan.id, scan.state, scan.name, scan.root_path
            );
            let start = Instant::now();
            match self.drive(&ctx, scan.id) {
                Ok(final_state) => outcomes.push(ScanOutcome {
                    scan_id: scan.id,
                    final_state,
                    error: None,
                    duration: start.elapsed(),
                }),
                Err(Error::Cancelled) => {
                    warn!("Processing cancelled during scan {}", scan.id);
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    error!("Scan {} failed: {}", scan.id, e);
                    reporter.on_scan_failed(scan.id, &e.to_string());
                    let final_state = db
                        .get_scan(scan.id)
                        .ok()
                        .flatten()
                        .map(|s| s.state)
                        .unwrap_or(scan.state);
                    outcomes.push(ScanOutcome {
                        scan_id: scan.id,
                        final_state,
                        error: Some(e.to_string()),
                        duration: start.elapsed(),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel_token.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Advance one scan until Completed, holding its lock throughout.
    fn drive(&self, ctx: &PhaseContext<'_>, scan_id: i64) -> Result<ScanState, Error> {
        let retry = self.retry_policy();
        let db = ctx.db;

        let scan = load_scan(db, scan_id)?;
        if scan.state == ScanState::Completed {
            return Ok(scan.state);
        }

        let _lock = retry.run("lock scan", || {
            ScanLock::acquire(db, scan_id, self.config.lock_stale_after())
        })?;
        // Re-read under the lock; another worker may have advanced it meanwhile.
        let mut scan = load_scan(db, scan_id)?;

        while scan.state != ScanState::Completed {
            self.check_cancelled()?;
            ctx.reporter.on_phase_start(scan.id, scan.state);
            let start = Instant::now();

            let next = retry.run(scan.state.label(), || self.run_action(ctx, &scan))?;
            retry.run("persist scan state", || Ok(db.set_scan_state(scan.id, next)?))?;

            info!(
                "Scan {}: {} -> {} in {:.2}s",
                scan.id,
                scan.state,
                next,
                start.elapsed().as_secs_f64()
            );
            ctx.reporter
                .on_phase_complete(scan.id, next, start.elapsed().as_secs_f64());
            scan.state = next;
        }
        Ok(scan.state)
    }

    /// Run the action that leaves `scan.state` and return the state it leads to.
    /// Every action is safe to repeat after a partial run.
    fn run_action(&self, ctx: &PhaseContext<'_>, scan: &Scan) -> Result<ScanState, Error> {
        match scan.state {
            ScanState::Pending => {
                ctx.db.delete_nodes_for_scan(scan.id)?;
                TreeIngestor::new(ctx.db, ctx.ignore_patterns, ctx.reporter).ingest(scan)?;
                analysis::classify_files(
                    ctx.db,
                    scan.id,
                    ctx.pool,
                    self.config.hash_batch_size,
                    &self.cancel_token,
                    ctx.reporter,
                )?;
            }
            ScanState::Scanned => {
                analysis::aggregate_folder_sizes(ctx.db, scan.id)?;
            }
            ScanState::FolderSizeUpdated => {
                analysis::classify_folders(ctx.db, scan.id)?;
            }
            ScanState::DuplicateFolderMarked | ScanState::Completed => {}
        }
        Ok(scan.state.next())
    }
}

fn load_scan(db: &Database, scan_id: i64) -> Result<Scan, Error> {
    db.get_scan(scan_id)?.ok_or(Error::ScanNotFound(scan_id))
}
