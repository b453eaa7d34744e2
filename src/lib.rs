//! Bidirectional row-level synchronization for SQLite databases.
//!
//! Triggers maintain a sidecar change-log for every configured table;
//! peers exchange change sets described by monotonic integer anchors and
//! replay them under a conflict-aware state machine.

pub mod anchors;
pub mod changes;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod provider;
pub mod schema;
pub mod templates;
pub mod tracking;
pub mod values;

pub use changes::{Anchor, ChangeItem, ChangeSet, ChangeType, ConflictResolution};
pub use config::{SyncConfig, SyncDirection, TableConfig};
pub use error::{Result, SyncError};
pub use provider::SyncProvider;
pub use values::ColumnKind;
