use clap::{Parser, Subcommand, ValueEnum};
use dupe_tree_core::NodeKind;

#[derive(Debug, Parser)]
#[command(name = "dupe-tree")]
#[command(about = "Find duplicate files and folders under a root path", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Queue a new scan of a root folder
    New {
        /// Display name of the scan
        #[arg(long)]
        name: String,
        /// Folder to scan
        root: String,
    },
    /// Process every scan that is not completed yet
    Process,
    /// List all scans, newest first
    List,
    /// Show node counts per state for a scan
    Show {
        scan_id: i64,
        /// Print the details as JSON
        #[arg(long)]
        json: bool,
    },
    /// List duplicate groups of a completed scan
    Dupes {
        scan_id: i64,
        #[arg(long, value_enum, default_value_t = KindArg::File)]
        kind: KindArg,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Delete a scan and all of its nodes
    DeleteScan { scan_id: i64 },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    File,
    Folder,
}

impl From<KindArg> for NodeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::File => NodeKind::File,
            KindArg::Folder => NodeKind::Folder,
        }
    }
}
