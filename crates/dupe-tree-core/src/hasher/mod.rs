pub mod content;
pub mod pool;

pub use content::ContentHasher;
pub use pool::{HashOutcome, HashPool};
