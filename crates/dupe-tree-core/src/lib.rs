pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod progress;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use engine::{readable_state, ScanEngine, ScanOutcome};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use storage::models::{Digest, NodeKind, NodeState, ScanState};
pub use storage::Database;
