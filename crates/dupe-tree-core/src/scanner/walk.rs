use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::storage::models::{NodeKind, Scan, ScanCounters, UNKNOWN_SIZE};
use crate::storage::Database;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Compile ignore globs, dropping (and logging) invalid ones.
pub fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Single-slot memo of the last resolved parent folder.
///
/// Entries of one directory share a parent, so one lookup per directory suffices.
#[derive(Debug, Default)]
pub struct ParentCache {
    slot: Option<(String, i64)>,
}

impl ParentCache {
    pub fn resolve(
        &mut self,
        db: &Database,
        scan_id: i64,
        parent: &str,
        child: &str,
    ) -> Result<i64, Error> {
        if let Some((path, id)) = &self.slot {
            if path == parent {
                return Ok(*id);
            }
        }
        let id = db
            .find_node_by_path(scan_id, NodeKind::Folder, parent)?
            .ok_or_else(|| Error::Ingestion {
                path: PathBuf::from(child),
                parent: PathBuf::from(parent),
            })?;
        self.slot = Some((parent.to_string(), id));
        Ok(id)
    }
}

/// Sub-folders and files (with sizes) of one directory, each sorted by path.
///
/// Paths are kept as the exact strings stored in `fsobject.full_path`, so
/// the hashing pool reopens the same file that was listed.
struct Listing {
    folders: Vec<String>,
    files: Vec<(String, u64)>,
}

/// Walks a scan's root depth-first and records one node per folder and file.
pub struct TreeIngestor<'a> {
    db: &'a Database,
    ignore_patterns: &'a [Pattern],
    reporter: &'a dyn ProgressReporter,
}

impl<'a> TreeIngestor<'a> {
    pub fn new(
        db: &'a Database,
        ignore_patterns: &'a [Pattern],
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            db,
            ignore_patterns,
            reporter,
        }
    }

    /// Ingest the tree under `scan.root_path`.
    ///
    /// Each directory's folder entries and file entries are committed as separate
    /// batches. Folders start at unknown size; files carry their measured size.
    /// Entries whose names are not valid UTF-8 are skipped with a warning.
    pub fn ingest(&self, scan: &Scan) -> Result<ScanCounters, Error> {
        let root = scan.root_path.clone();
        if !fs::metadata(&root)?.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("Root path {} is not a directory", root),
            )));
        }

        let mut counters = ScanCounters {
            folders: 1,
            ..ScanCounters::default()
        };
        let mut cache = ParentCache::default();

        self.db.transaction(|db| {
            Ok(db.insert_node(scan.id, None, NodeKind::Folder, &root, UNKNOWN_SIZE)?)
        })?;

        let mut stack = vec![root.clone()];
        while let Some(parent) = stack.pop() {
            let listing = match self.read_listing(Path::new(&parent)) {
                Ok(listing) => listing,
                Err(e) if parent != root => {
                    warn!("Skipping unreadable directory {}: {}", parent, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.db.transaction(|db| {
                for folder in &listing.folders {
                    let parent_id = cache.resolve(db, scan.id, &parent, folder)?;
                    db.insert_node(
                        scan.id,
                        Some(parent_id),
                        NodeKind::Folder,
                        folder,
                        UNKNOWN_SIZE,
                    )?;
                }
                Ok(())
            })?;

            self.db.transaction(|db| {
                for (file, size) in &listing.files {
                    let parent_id = cache.resolve(db, scan.id, &parent, file)?;
                    db.insert_node(
                        scan.id,
                        Some(parent_id),
                        NodeKind::File,
                        file,
                        *size as i64,
                    )?;
                }
                Ok(())
            })?;

            counters.folders += listing.folders.len() as i64;
            counters.files += listing.files.len() as i64;
            counters.bytes += listing.files.iter().map(|(_, size)| *size as i64).sum::<i64>();
            self.reporter
                .on_ingest_progress(counters.folders, counters.files, &parent);

            // Reversed so the first sub-folder by name is visited next.
            stack.extend(listing.folders.into_iter().rev());
        }

        self.db.update_scan_counters(scan.id, &counters)?;
        info!(
            "Scan {}: ingested {} folders and {} files ({} bytes)",
            scan.id, counters.folders, counters.files, counters.bytes
        );
        Ok(counters)
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn read_listing(&self, dir: &Path) -> io::Result<Listing> {
        let mut listing = Listing {
            folders: Vec::new(),
            files: Vec::new(),
        };

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let full_path = match path.to_str() {
                Some(full_path) => full_path.to_string(),
                None => {
                    warn!("Skipping {}: name is not valid UTF-8", path.display());
                    continue;
                }
            };

            // file_type() does not follow symlinks; links are never ingested.
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if file_type.is_symlink() || self.is_ignored(&path) {
                debug!("Skipping {}", path.display());
                continue;
            }

            if file_type.is_dir() {
                listing.folders.push(full_path);
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => listing.files.push((full_path, metadata.len())),
                    Err(e) => warn!("Skipping {} (no metadata): {}", path.display(), e),
                }
            }
        }

        listing.folders.sort();
        listing.files.sort();
        Ok(listing)
    }
}
