use super::models::*;
use super::now_millis;
use super::sqlite::Database;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const NODE_COLUMNS: &str = "id, scan_id, parent_id, kind, full_path, state, size_in_bytes, \
                            content_hash, error, created_timestamp, modified_timestamp";

const SCAN_COLUMNS: &str = "id, name, root_path, state, folder_count, file_count, \
                            total_size_in_bytes, created_timestamp, modified_timestamp";

/// Column a bulk partition groups on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupColumn {
    Size,
    Digest,
}

impl GroupColumn {
    fn column(self) -> &'static str {
        match self {
            GroupColumn::Size => "size_in_bytes",
            GroupColumn::Digest => "content_hash",
        }
    }
}

/// Group-size predicate, as in `HAVING COUNT(*) ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Exactly(i64),
    AtLeast(i64),
}

impl Cardinality {
    fn having(self) -> (&'static str, i64) {
        match self {
            Cardinality::Exactly(n) => ("=", n),
            Cardinality::AtLeast(n) => (">=", n),
        }
    }
}

/// Extra row filter for `bulk_update_state`, on top of (scan, kind, state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFilter {
    All,
    Id(i64),
    /// Rows whose `column` value is shared by a group of the given cardinality,
    /// counted among rows of the same scan, kind and state.
    Grouped {
        column: GroupColumn,
        cardinality: Cardinality,
    },
}

impl NodeFilter {
    pub fn grouped(column: GroupColumn, cardinality: Cardinality) -> Self {
        NodeFilter::Grouped {
            column,
            cardinality,
        }
    }

    /// SQL appended to a WHERE clause binding ?3 = scan, ?4 = kind, ?5 = state.
    fn clause(self) -> (String, Option<i64>) {
        match self {
            NodeFilter::All => (String::new(), None),
            NodeFilter::Id(id) => (" AND id = ?6".to_string(), Some(id)),
            NodeFilter::Grouped {
                column,
                cardinality,
            } => {
                let col = column.column();
                let (op, n) = cardinality.having();
                (
                    format!(
                        " AND {col} IN (SELECT {col} FROM fsobject \
                         WHERE scan_id = ?3 AND kind = ?4 AND state = ?5 \
                         GROUP BY {col} HAVING COUNT(*) {op} ?6)"
                    ),
                    Some(n),
                )
            }
        }
    }
}

fn scan_from_row(row: &Row) -> Result<Scan> {
    Ok(Scan {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        state: row.get(3)?,
        folder_count: row.get(4)?,
        file_count: row.get(5)?,
        total_size_in_bytes: row.get(6)?,
        created_timestamp: row.get(7)?,
        modified_timestamp: row.get(8)?,
    })
}

fn digest_column(row: &Row, idx: usize) -> Result<Option<Digest>> {
    let hex: String = row.get(idx)?;
    if hex.is_empty() {
        return Ok(None);
    }
    Digest::from_hex(&hex)
        .map(Some)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn node_from_row(row: &Row) -> Result<FsObject> {
    Ok(FsObject {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        parent_id: row.get(2)?,
        kind: row.get(3)?,
        full_path: row.get(4)?,
        state: row.get(5)?,
        size_in_bytes: row.get(6)?,
        digest: digest_column(row, 7)?,
        error: row.get(8)?,
        created_timestamp: row.get(9)?,
        modified_timestamp: row.get(10)?,
    })
}

impl Database {
    // ── Scans ────────────────────────────────────────────────────

    pub fn insert_scan(&self, name: &str, root_path: &str) -> Result<i64> {
        let now = now_millis();
        self.connection().execute(
            "INSERT INTO scan (name, root_path, state, created_timestamp, modified_timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, root_path, ScanState::Pending, now],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_scan(&self, scan_id: i64) -> Result<Option<Scan>> {
        self.connection()
            .query_row(
                &format!("SELECT {SCAN_COLUMNS} FROM scan WHERE id = ?1"),
                params![scan_id],
                scan_from_row,
            )
            .optional()
    }

    /// All scans, newest first.
    pub fn list_scans(&self) -> Result<Vec<Scan>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scan ORDER BY created_timestamp DESC, id DESC"
        ))?;
        let scans = stmt
            .query_map([], scan_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(scans)
    }

    /// Scans the engine still has work for, oldest request first.
    pub fn scans_not_completed(&self) -> Result<Vec<Scan>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {SCAN_COLUMNS} FROM scan WHERE state <> ?1 ORDER BY id"
        ))?;
        let scans = stmt
            .query_map(params![ScanState::Completed], scan_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(scans)
    }

    pub fn set_scan_state(&self, scan_id: i64, state: ScanState) -> Result<()> {
        self.connection().execute(
            "UPDATE scan SET state = ?1, modified_timestamp = ?2 WHERE id = ?3",
            params![state, now_millis(), scan_id],
        )?;
        Ok(())
    }

    pub fn update_scan_counters(&self, scan_id: i64, counters: &ScanCounters) -> Result<()> {
        self.connection().execute(
            "UPDATE scan SET folder_count = ?1, file_count = ?2, total_size_in_bytes = ?3, \
             modified_timestamp = ?4 WHERE id = ?5",
            params![
                counters.folders,
                counters.files,
                counters.bytes,
                now_millis(),
                scan_id
            ],
        )?;
        Ok(())
    }

    /// Remove a scan with its nodes and lock (cascade).
    pub fn delete_scan(&self, scan_id: i64) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM scan WHERE id = ?1", params![scan_id])?;
        Ok(removed > 0)
    }

    pub fn scan_details(&self, scan_id: i64) -> Result<Option<ScanDetails>> {
        let scan = match self.get_scan(scan_id)? {
            Some(scan) => scan,
            None => return Ok(None),
        };
        let mut stmt = self.connection().prepare(
            "SELECT kind, state, COUNT(*), COALESCE(SUM(MAX(size_in_bytes, 0)), 0) \
             FROM fsobject WHERE scan_id = ?1 \
             GROUP BY kind, state ORDER BY kind, state",
        )?;
        let counts = stmt
            .query_map(params![scan_id], |row| {
                Ok(StateCount {
                    kind: row.get(0)?,
                    state: row.get(1)?,
                    count: row.get(2)?,
                    bytes: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(ScanDetails { scan, counts }))
    }

    // ── Scan Lock ────────────────────────────────────────────────

    /// Insert the lock row for a scan, replacing one acquired before `stale_before`.
    /// Returns false when a fresh lock is already held.
    pub fn try_lock_scan(&self, scan_id: i64, owner: &str, stale_before: i64) -> Result<bool> {
        self.connection().execute(
            "DELETE FROM scan_lock WHERE scan_id = ?1 AND acquired_timestamp < ?2",
            params![scan_id, stale_before],
        )?;
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO scan_lock (scan_id, owner, acquired_timestamp) \
             VALUES (?1, ?2, ?3)",
            params![scan_id, owner, now_millis()],
        )?;
        Ok(inserted == 1)
    }

    pub fn release_scan_lock(&self, scan_id: i64, owner: &str) -> Result<()> {
        self.connection().execute(
            "DELETE FROM scan_lock WHERE scan_id = ?1 AND owner = ?2",
            params![scan_id, owner],
        )?;
        Ok(())
    }

    // ── Nodes ────────────────────────────────────────────────────

    pub fn delete_nodes_for_scan(&self, scan_id: i64) -> Result<usize> {
        let removed = self
            .connection()
            .execute("DELETE FROM fsobject WHERE scan_id = ?1", params![scan_id])?;
        debug!("Deleted {} stale nodes for scan {}", removed, scan_id);
        Ok(removed)
    }

    pub fn insert_node(
        &self,
        scan_id: i64,
        parent_id: Option<i64>,
        kind: NodeKind,
        full_path: &str,
        size_in_bytes: i64,
    ) -> Result<i64> {
        let now = now_millis();
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO fsobject (scan_id, parent_id, kind, full_path, state, size_in_bytes, \
             content_hash, created_timestamp, modified_timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?7)",
        )?;
        stmt.execute(params![
            scan_id,
            parent_id,
            kind,
            full_path,
            NodeState::Pending,
            size_in_bytes,
            now
        ])?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn find_node_by_path(
        &self,
        scan_id: i64,
        kind: NodeKind,
        full_path: &str,
    ) -> Result<Option<i64>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id FROM fsobject WHERE scan_id = ?1 AND kind = ?2 AND full_path = ?3",
        )?;
        stmt.query_row(params![scan_id, kind, full_path], |row| row.get(0))
            .optional()
    }

    pub fn get_node_by_path(&self, scan_id: i64, full_path: &str) -> Result<Option<FsObject>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM fsobject WHERE scan_id = ?1 AND full_path = ?2"
                ),
                params![scan_id, full_path],
                node_from_row,
            )
            .optional()
    }

    pub fn count_nodes(&self, scan_id: i64, kind: NodeKind, state: NodeState) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM fsobject WHERE scan_id = ?1 AND kind = ?2 AND state = ?3",
            params![scan_id, kind, state],
            |row| row.get(0),
        )
    }

    /// First `limit` nodes in a state, by id.
    pub fn fetch_nodes(
        &self,
        scan_id: i64,
        kind: NodeKind,
        state: NodeState,
        limit: i64,
    ) -> Result<Vec<FsObject>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM fsobject \
             WHERE scan_id = ?1 AND kind = ?2 AND state = ?3 ORDER BY id LIMIT ?4"
        ))?;
        let nodes = stmt
            .query_map(params![scan_id, kind, state, limit], node_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Declarative state transition: every (scan, kind, match_state) row passing
    /// `filter` moves to `set_state`. Returns the number of rows moved.
    pub fn bulk_update_state(
        &self,
        scan_id: i64,
        kind: NodeKind,
        match_state: NodeState,
        set_state: NodeState,
        filter: NodeFilter,
    ) -> Result<usize> {
        let (clause, extra) = filter.clause();
        let sql = format!(
            "UPDATE fsobject SET state = ?1, modified_timestamp = ?2 \
             WHERE scan_id = ?3 AND kind = ?4 AND state = ?5{clause}"
        );
        let now = now_millis();
        let updated = match extra {
            Some(value) => self.connection().execute(
                &sql,
                params![set_state, now, scan_id, kind, match_state, value],
            )?,
            None => self
                .connection()
                .execute(&sql, params![set_state, now, scan_id, kind, match_state])?,
        };
        debug!(
            "Scan {}: {} {} nodes {} -> {}",
            scan_id, updated, kind, match_state, set_state
        );
        Ok(updated)
    }

    /// Rows of (scan, kind, state) whose `column` value occurs in a group of the
    /// given cardinality, ordered by that value then path.
    ///
    /// Read-only inspection query. The classifiers move the same partitions with
    /// `bulk_update_state` and `NodeFilter::Grouped`, so this returns exactly the
    /// rows such an update would touch.
    pub fn group_by_cardinality(
        &self,
        scan_id: i64,
        kind: NodeKind,
        state: NodeState,
        column: GroupColumn,
        cardinality: Cardinality,
    ) -> Result<Vec<FsObject>> {
        let col = column.column();
        let (op, n) = cardinality.having();
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM fsobject \
             WHERE scan_id = ?1 AND kind = ?2 AND state = ?3 AND {col} IN \
             (SELECT {col} FROM fsobject WHERE scan_id = ?1 AND kind = ?2 AND state = ?3 \
              GROUP BY {col} HAVING COUNT(*) {op} ?4) \
             ORDER BY {col}, full_path"
        ))?;
        let nodes = stmt
            .query_map(params![scan_id, kind, state, n], node_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Record a file's digest. The digest is written once, on the Pending -> HashComputed step.
    pub fn set_file_digest(&self, node_id: i64, digest: &Digest) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(
            "UPDATE fsobject SET content_hash = ?1, state = ?2, modified_timestamp = ?3 \
             WHERE id = ?4 AND state = ?5 AND content_hash = ''",
        )?;
        stmt.execute(params![
            digest,
            NodeState::HashComputed,
            now_millis(),
            node_id,
            NodeState::Pending
        ])
    }

    pub fn mark_hash_failed(&self, node_id: i64, message: &str) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(
            "UPDATE fsobject SET state = ?1, error = ?2, modified_timestamp = ?3 \
             WHERE id = ?4 AND state = ?5",
        )?;
        stmt.execute(params![
            NodeState::HashFailed,
            message,
            now_millis(),
            node_id,
            NodeState::Pending
        ])
    }

    // ── Folder Size Aggregation ──────────────────────────────────

    pub fn count_unknown_size_folders(&self, scan_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM fsobject WHERE scan_id = ?1 AND kind = ?2 AND size_in_bytes = ?3",
            params![scan_id, NodeKind::Folder, UNKNOWN_SIZE],
            |row| row.get(0),
        )
    }

    /// Folders of unknown size whose direct children are all measured,
    /// paired with the sum of those children's sizes.
    pub fn folders_ready_for_size(&self, scan_id: i64) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT f.id, \
                    COALESCE((SELECT SUM(c.size_in_bytes) FROM fsobject c WHERE c.parent_id = f.id), 0) \
             FROM fsobject f \
             WHERE f.scan_id = ?1 AND f.kind = ?2 AND f.size_in_bytes = ?3 \
               AND NOT EXISTS (SELECT 1 FROM fsobject c \
                               WHERE c.parent_id = f.id AND c.size_in_bytes = ?3) \
             ORDER BY f.id",
        )?;
        let ready = stmt
            .query_map(params![scan_id, NodeKind::Folder, UNKNOWN_SIZE], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(ready)
    }

    pub fn update_folder_size(&self, folder_id: i64, size_in_bytes: i64) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(
            "UPDATE fsobject SET size_in_bytes = ?1, modified_timestamp = ?2 \
             WHERE id = ?3 AND size_in_bytes = ?4",
        )?;
        stmt.execute(params![size_in_bytes, now_millis(), folder_id, UNKNOWN_SIZE])
    }

    // ── Folder Classification ────────────────────────────────────

    /// Pending folders none of whose direct children are still Pending.
    pub fn folders_ready_for_classification(&self, scan_id: i64) -> Result<Vec<FolderTally>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT f.id, \
                    (SELECT COUNT(*) FROM fsobject c WHERE c.parent_id = f.id), \
                    (SELECT COUNT(*) FROM fsobject c WHERE c.parent_id = f.id AND c.state IN (?4, ?5)) \
             FROM fsobject f \
             WHERE f.scan_id = ?1 AND f.kind = ?2 AND f.state = ?3 \
               AND NOT EXISTS (SELECT 1 FROM fsobject c \
                               WHERE c.parent_id = f.id AND c.state = ?3) \
             ORDER BY f.id",
        )?;
        let ready = stmt
            .query_map(
                params![
                    scan_id,
                    NodeKind::Folder,
                    NodeState::Pending,
                    NodeState::DuplicateByHash,
                    NodeState::DuplicateBySubitem
                ],
                |row| {
                    Ok(FolderTally {
                        folder_id: row.get(0)?,
                        children: row.get(1)?,
                        duplicate_children: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(ready)
    }

    /// Digests of a folder's direct children in canonical (full path) order.
    /// Children without a digest are skipped.
    pub fn child_digests(&self, folder_id: i64) -> Result<Vec<Digest>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT content_hash FROM fsobject \
             WHERE parent_id = ?1 AND content_hash <> '' ORDER BY full_path",
        )?;
        let digests = stmt
            .query_map(params![folder_id], |row| digest_column(row, 0))?
            .filter_map(|digest| digest.transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(digests)
    }

    pub fn mark_folder(
        &self,
        folder_id: i64,
        state: NodeState,
        digest: Option<&Digest>,
    ) -> Result<usize> {
        let mut stmt = self.connection().prepare_cached(
            "UPDATE fsobject SET state = ?1, content_hash = COALESCE(?2, content_hash), \
             modified_timestamp = ?3 WHERE id = ?4 AND state = ?5",
        )?;
        stmt.execute(params![
            state,
            digest,
            now_millis(),
            folder_id,
            NodeState::Pending
        ])
    }

    // ── Listings ─────────────────────────────────────────────────

    pub fn list_nodes(
        &self,
        scan_id: i64,
        kind: NodeKind,
        state: Option<NodeState>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<FsObject>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM fsobject \
             WHERE scan_id = ?1 AND kind = ?2 AND (?3 IS NULL OR state = ?3) \
             ORDER BY full_path LIMIT ?4 OFFSET ?5"
        ))?;
        let nodes = stmt
            .query_map(params![scan_id, kind, state, limit, offset], node_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Duplicate nodes of one kind grouped by digest, largest waste first.
    pub fn duplicate_groups(
        &self,
        scan_id: i64,
        kind: NodeKind,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self.connection().prepare(
            "SELECT content_hash, MAX(size_in_bytes), COUNT(*), \
                    MAX(size_in_bytes) * (COUNT(*) - 1) AS wasted \
             FROM fsobject \
             WHERE scan_id = ?1 AND kind = ?2 AND state = ?3 AND content_hash <> '' \
             GROUP BY content_hash HAVING COUNT(*) > 1 \
             ORDER BY wasted DESC, content_hash LIMIT ?4 OFFSET ?5",
        )?;
        let groups = stmt
            .query_map(
                params![scan_id, kind, kind.duplicate_state(), limit, offset],
                |row| {
                    let digest = digest_column(row, 0)?.ok_or(rusqlite::Error::InvalidColumnType(
                        0,
                        "content_hash".to_string(),
                        Type::Null,
                    ))?;
                    Ok(DuplicateGroup {
                        digest,
                        kind,
                        size_in_bytes: row.get(1)?,
                        member_count: row.get(2)?,
                        wasted_bytes: row.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn group_members(
        &self,
        scan_id: i64,
        kind: NodeKind,
        digest: &Digest,
    ) -> Result<Vec<FsObject>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM fsobject \
             WHERE scan_id = ?1 AND kind = ?2 AND content_hash = ?3 ORDER BY full_path"
        ))?;
        let nodes = stmt
            .query_map(params![scan_id, kind, digest], node_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }
}
