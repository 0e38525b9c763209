use colored::*;
use dupe_tree_core::{ProgressReporter, ScanState};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Phases and ingestion: spinner (totals unknown upfront)
/// - Hashing: progress bar (pending file count known before hashing starts)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_chars(TICK_CHARS),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap();
        if let Some(pb) = guard.as_ref() {
            f(pb);
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_phase_start(&self, scan_id: i64, from: ScanState) {
        self.set_bar(spinner(format!("Scan {}: leaving {}...", scan_id, from)));
    }

    fn on_phase_complete(&self, scan_id: i64, to: ScanState, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Scan {}: {} in {:.2}s",
            "✓".green(),
            scan_id,
            to,
            duration_secs
        );
    }

    fn on_ingest_progress(&self, folders: i64, files: i64, _current_path: &str) {
        self.with_bar(|pb| {
            pb.set_message(format!(
                "Ingesting... {} folders, {} files",
                folders, files
            ))
        });
    }

    fn on_hash_start(&self, total_files: u64) {
        let pb = ProgressBar::new(total_files);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Hashing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
            )
            .unwrap()
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_hash_progress(&self, files_hashed: u64, total_files: u64) {
        self.with_bar(|pb| {
            if pb.length() != Some(total_files) {
                pb.set_length(total_files);
            }
            pb.set_position(files_hashed);
        });
    }

    fn on_hash_complete(&self, hashed: u64, failed: u64, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Hash complete: {} files in {:.2}s ({} unreadable)",
            "✓".green(),
            hashed,
            duration_secs,
            failed
        );
        self.set_bar(spinner("Classifying files...".to_string()));
    }

    fn on_scan_failed(&self, scan_id: i64, message: &str) {
        self.finish_bar();
        eprintln!("  {} Scan {} failed: {}", "✗".red(), scan_id, message);
    }
}
