use crate::error::Error;
use rusqlite::{Connection, Result};
use tracing::{debug, warn};

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
        Ok(())
    }

    /// Check schema version and migrate if needed.
    /// Any other layout version is dropped and recreated; every row is re-derivable
    /// by re-scanning.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != 0 && version != SCHEMA_VERSION {
            warn!(
                "Schema version {} != {}, dropping all tables and recreating",
                version, SCHEMA_VERSION
            );
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS scan_lock;
                 DROP TABLE IF EXISTS fsobject;
                 DROP TABLE IF EXISTS scan;",
            )?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one transaction. An error from `f` rolls everything back.
    ///
    /// Must not be nested: SQLite has a single transaction per connection.
    pub fn transaction<T, F>(&self, f: F) -> std::result::Result<T, Error>
    where
        F: FnOnce(&Database) -> std::result::Result<T, Error>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM scan_lock;
             DELETE FROM fsobject;
             DELETE FROM scan;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
