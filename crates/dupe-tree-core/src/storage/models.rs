use crate::error::Error;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};
use std::fmt;

/// Size of a folder whose children have not all been measured yet.
pub const UNKNOWN_SIZE: i64 = -1;

/// Lifecycle of a scan. Codes are persisted and only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ScanState {
    Pending = 1,
    Scanned = 2,
    FolderSizeUpdated = 3,
    DuplicateFolderMarked = 4,
    Completed = 5,
}

impl ScanState {
    pub fn code(self) -> i64 {
        self as i64
    }

    /// The state entered once this state's action has committed.
    pub fn next(self) -> ScanState {
        match self {
            ScanState::Pending => ScanState::Scanned,
            ScanState::Scanned => ScanState::FolderSizeUpdated,
            ScanState::FolderSizeUpdated => ScanState::DuplicateFolderMarked,
            ScanState::DuplicateFolderMarked | ScanState::Completed => ScanState::Completed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScanState::Pending => "PENDING",
            ScanState::Scanned => "OBJECT SCAN COMPLETE",
            ScanState::FolderSizeUpdated => "FOLDER SIZE UPDATED",
            ScanState::DuplicateFolderMarked => "DUPLICATE FOLDERS MARKED",
            ScanState::Completed => "COMPLETED",
        }
    }
}

impl TryFrom<i64> for ScanState {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ScanState::Pending),
            2 => Ok(ScanState::Scanned),
            3 => Ok(ScanState::FolderSizeUpdated),
            4 => Ok(ScanState::DuplicateFolderMarked),
            5 => Ok(ScanState::Completed),
            other => Err(Error::InvalidState(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    Folder = 1,
    File = 2,
}

impl NodeKind {
    pub fn code(self) -> i64 {
        self as i64
    }

    /// State a node of this kind ends in when it duplicates something else.
    pub fn duplicate_state(self) -> NodeState {
        match self {
            NodeKind::Folder => NodeState::DuplicateBySubitem,
            NodeKind::File => NodeState::DuplicateByHash,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Folder => "FOLDER",
            NodeKind::File => "FILE",
        }
    }
}

impl TryFrom<i64> for NodeKind {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(NodeKind::Folder),
            2 => Ok(NodeKind::File),
            other => Err(Error::InvalidState(other)),
        }
    }
}

/// Classification of a single filesystem object.
///
/// Files move `Pending -> UniqueBySize` or `Pending -> HashComputed -> {DuplicateByHash,
/// UniqueByHash}`, or stop at `HashFailed` when their content could not be read.
/// Folders move `Pending -> {DuplicateBySubitem, UniqueBySubitem}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    Pending = 1,
    HashComputed = 2,
    DuplicateByHash = 3,
    DuplicateBySubitem = 4,
    UniqueBySize = 5,
    UniqueByHash = 6,
    UniqueBySubitem = 7,
    HashFailed = 8,
}

impl NodeState {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn is_duplicate(self) -> bool {
        matches!(
            self,
            NodeState::DuplicateByHash | NodeState::DuplicateBySubitem
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            NodeState::Pending | NodeState::HashComputed | NodeState::HashFailed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeState::Pending => "PENDING",
            NodeState::HashComputed => "HASH COMPUTED",
            NodeState::DuplicateByHash => "DUPLICATE BY HASH",
            NodeState::DuplicateBySubitem => "DUPLICATE BY SUBITEM",
            NodeState::UniqueBySize => "UNIQUE BY SIZE",
            NodeState::UniqueByHash => "UNIQUE BY HASH",
            NodeState::UniqueBySubitem => "UNIQUE BY SUBITEM",
            NodeState::HashFailed => "HASH FAILED",
        }
    }
}

impl TryFrom<i64> for NodeState {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(NodeState::Pending),
            2 => Ok(NodeState::HashComputed),
            3 => Ok(NodeState::DuplicateByHash),
            4 => Ok(NodeState::DuplicateBySubitem),
            5 => Ok(NodeState::UniqueBySize),
            6 => Ok(NodeState::UniqueByHash),
            7 => Ok(NodeState::UniqueBySubitem),
            8 => Ok(NodeState::HashFailed),
            other => Err(Error::InvalidState(other)),
        }
    }
}

macro_rules! sql_code_enum {
    ($($ty:ty),+) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.code()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let code = value.as_i64()?;
                    <$ty>::try_from(code).map_err(|_| FromSqlError::OutOfRange(code))
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.label())
                }
            }
        )+
    };
}

sql_code_enum!(ScanState, NodeKind, NodeState);

/// 32-byte BLAKE3 content fingerprint, persisted as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Digest, Error> {
        blake3::Hash::from_hex(hex)
            .map(Digest::from)
            .map_err(|e| Error::Other(format!("invalid digest '{}': {}", hex, e)))
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Digest(*hash.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl ToSql for Digest {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_hex()))
    }
}

/// One scan request over a root folder.
#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub state: ScanState,
    pub folder_count: i64,
    pub file_count: i64,
    pub total_size_in_bytes: i64,
    pub created_timestamp: i64,
    pub modified_timestamp: i64,
}

/// A file or folder recorded for a scan.
#[derive(Debug, Clone, Serialize)]
pub struct FsObject {
    pub id: i64,
    pub scan_id: i64,
    pub parent_id: Option<i64>,
    pub kind: NodeKind,
    pub full_path: String,
    pub state: NodeState,
    pub size_in_bytes: i64,
    pub digest: Option<Digest>,
    pub error: Option<String>,
    pub created_timestamp: i64,
    pub modified_timestamp: i64,
}

/// Totals written to the scan record once ingestion finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    pub folders: i64,
    pub files: i64,
    pub bytes: i64,
}

/// Child tallies of a folder whose children are all classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderTally {
    pub folder_id: i64,
    pub children: i64,
    pub duplicate_children: i64,
}

impl FolderTally {
    /// An empty folder is never a duplicate.
    pub fn is_all_duplicate(&self) -> bool {
        self.children > 0 && self.children == self.duplicate_children
    }
}

/// Nodes of one kind sharing a digest.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub digest: Digest,
    pub kind: NodeKind,
    pub size_in_bytes: i64,
    pub member_count: i64,
    pub wasted_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateCount {
    pub kind: NodeKind,
    pub state: NodeState,
    pub count: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanDetails {
    pub scan: Scan,
    pub counts: Vec<StateCount>,
}
