use thiserror::Error;

use crate::changes::Anchor;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("anchor was issued by an incompatible provider: {kind}")]
    IncompatibleAnchor { kind: String },

    #[error("anchor version {version} predates the oldest retained change-log entry ({oldest})")]
    AnchorTooOld { version: i64, oldest: i64 },

    #[error(
        "insert collides with an existing row; re-sync from version {}",
        .candidate_anchor.version
    )]
    InvalidSyncOperation { candidate_anchor: Anchor },

    #[error("database error: {0}")]
    Driver(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
