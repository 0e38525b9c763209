pub mod lock;
pub mod models;
mod queries;
pub mod retry;
mod sqlite;

pub use lock::ScanLock;
pub use queries::{Cardinality, GroupColumn, NodeFilter};
pub use retry::RetryPolicy;
pub use sqlite::Database;

/// Milliseconds since the Unix epoch, the unit of every persisted timestamp.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
