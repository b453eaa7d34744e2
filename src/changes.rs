use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, SyncError};

/// Provider tag carried by every anchor this crate produces.
pub const SQLITE_ANCHOR_KIND: &str = "sqlite";

/// A point in a store's change history, compared by its integer version.
///
/// Version 0 means "before anything". Anchors carry the tag of the
/// provider that issued them; operations reject anchors from a foreign
/// provider kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub kind: String,
    pub version: i64,
}

impl Anchor {
    pub fn sqlite(version: i64) -> Self {
        Self {
            kind: SQLITE_ANCHOR_KIND.to_string(),
            version,
        }
    }

    /// The anchor that precedes the first change ever recorded.
    pub fn zero() -> Self {
        Self::sqlite(0)
    }

    pub(crate) fn expect_sqlite(&self) -> Result<i64> {
        if self.kind != SQLITE_ANCHOR_KIND {
            return Err(SyncError::IncompatibleAnchor {
                kind: self.kind.clone(),
            });
        }
        Ok(self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    /// One-character operation code stored in the change-log.
    pub fn op_code(&self) -> &'static str {
        match self {
            ChangeType::Insert => "I",
            ChangeType::Update => "U",
            ChangeType::Delete => "D",
        }
    }

    pub fn from_op_code(code: &str) -> Result<Self> {
        match code {
            "I" => Ok(ChangeType::Insert),
            "U" => Ok(ChangeType::Update),
            "D" => Ok(ChangeType::Delete),
            other => Err(SyncError::Configuration(format!(
                "unknown change-log operation code: {other}"
            ))),
        }
    }
}

/// One row-level mutation: which table, what kind, and the column values.
///
/// `values` maps column names to JSON values; `null` entries pass through
/// as SQL NULL when the item is applied. Delete items carry only the
/// primary-key columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub schema: String,
    pub table: String,
    pub change_type: ChangeType,
    pub values: Map<String, JsonValue>,
}

impl ChangeItem {
    /// Fully qualified source table name as recorded in the change-log.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// An anchor plus the ordered list of changes observed since the caller's
/// previous anchor. Serializable for transport between processes.
///
/// For an extracted set the anchor names the producing store's version.
/// Before handing a set to a peer's `apply_changes`, the caller replaces
/// the anchor with its record of that peer's version (the base anchor);
/// conflict detection compares the peer's own change-log against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub anchor: Anchor,
    pub items: Vec<ChangeItem>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Verdict returned by a conflict resolver for an update or delete whose
/// target row has newer local changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Leave the local row as it is. This is the default.
    Skip,
    /// Apply the incoming change regardless of local history.
    ForceWrite,
}
