use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    /// Hashing pool size; 0 uses the available parallelism.
    pub hash_workers: usize,
    pub hash_chunk_size: usize,
    pub hash_batch_size: usize,
    pub ingest_ignore_patterns: Vec<String>,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff_ms: u64,
    pub lock_stale_after_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "dupe_tree.db".to_string(),
            hash_workers: 0,
            hash_chunk_size: 64 * 1024,
            hash_batch_size: 256,
            ingest_ignore_patterns: Vec::new(),
            storage_retry_attempts: 3,
            storage_retry_backoff_ms: 50,
            lock_stale_after_secs: 3600,
        }
    }
}

impl AppConfig {
    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }
}

/// Load `DupeTree.{toml,yaml,json}` if present, then `DUPE_TREE_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("DupeTree").required(false))
        .add_source(
            Environment::with_prefix("DUPE_TREE")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ingest_ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
