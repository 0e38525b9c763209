//! Bottom-up classification passes over the flat node table.
//!
//! None of these passes hold the tree in memory. Each repeats a flat query for
//! eligible rows and a bulk update until nothing is left to resolve.

pub mod file_phase;
pub mod folder_phase;
pub mod folder_size;

pub use file_phase::{classify_files, FilePhaseSummary};
pub use folder_phase::{classify_folders, FolderPhaseSummary};
pub use folder_size::{aggregate_folder_sizes, SizeSummary};
