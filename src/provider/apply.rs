// ABOUTME: Conflict-aware replay of a change set onto the local store
// ABOUTME: Per-item state machine with resolver callbacks and forced-write retries

use rusqlite::{Connection, TransactionBehavior};

use crate::changes::{Anchor, ChangeItem, ChangeSet, ChangeType, ConflictResolution};
use crate::error::{Result, SyncError};
use crate::templates::{PARAM_LAST_SYNC_VERSION, PARAM_SYNC_FORCE_WRITE};
use crate::values::json_to_sqlite_value;

use super::{check_anchor_age, log_bounds, SyncProvider, TableRuntime};

impl SyncProvider {
    /// Replay a change set produced by a peer.
    ///
    /// The set's anchor is the base anchor: this store's version as of
    /// the peer's last sync. A local change-log entry newer than it is a
    /// change the peer has not seen, and any incoming update or delete
    /// touching such a row is a conflict.
    ///
    /// The whole set runs under one write transaction: observers see all
    /// of it or none of it, and a failure mid-set leaves the store and
    /// its change-log untouched.
    ///
    /// Each item executes its table's template. An update or delete that
    /// affects no rows has lost against newer local changes; the
    /// `resolver` is asked for a verdict and the item is either retried
    /// with the conflict check bypassed
    /// ([`ConflictResolution::ForceWrite`]) or dropped
    /// ([`ConflictResolution::Skip`], the default when no resolver is
    /// supplied). A forced update whose target row is gone is replayed
    /// as an insert, resurrecting the row with the incoming values.
    ///
    /// Returns the store's version after the replay, read inside the
    /// same transaction, so the caller can exclude its own writes from
    /// the next extraction.
    ///
    /// # Errors
    ///
    /// An insert that affects no rows collides with an existing row;
    /// there is no legitimate way to proceed and the whole set rolls
    /// back with [`SyncError::InvalidSyncOperation`] carrying the
    /// version to re-sync from.
    pub fn apply_changes(
        &self,
        change_set: &ChangeSet,
        mut resolver: Option<&mut dyn FnMut(&ChangeItem) -> ConflictResolution>,
    ) -> Result<Anchor> {
        let base_version = change_set.anchor.expect_sqlite()?;
        let tables = self.ensure_initialized()?;
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (_, min) = log_bounds(&tx)?;
        check_anchor_age(base_version, min)?;

        for item in &change_set.items {
            let runtime = Self::table_runtime(&tables, item)?;
            apply_item(&tx, runtime, item, base_version, &mut resolver)?;
        }

        let (max, _) = log_bounds(&tx)?;
        tx.commit()?;

        tracing::info!(
            "Applied {} change items, store now at version {}",
            change_set.items.len(),
            max
        );

        Ok(Anchor::sqlite(max))
    }
}

fn apply_item(
    conn: &Connection,
    runtime: &TableRuntime,
    item: &ChangeItem,
    base_version: i64,
    resolver: &mut Option<&mut dyn FnMut(&ChangeItem) -> ConflictResolution>,
) -> Result<()> {
    let mut force_write = false;
    let mut op = item.change_type;

    loop {
        let affected = execute_template(conn, runtime, op, item, base_version, force_write)?;
        if affected >= 1 {
            tracing::debug!(
                "Applied {:?} on '{}' ({} rows)",
                op,
                runtime.config.qualified_name(),
                affected
            );
            return Ok(());
        }

        match op {
            ChangeType::Insert => {
                // INSERT OR IGNORE touched nothing, so a row with this
                // primary key already exists
                let (max, _) = log_bounds(conn)?;
                return Err(SyncError::InvalidSyncOperation {
                    candidate_anchor: Anchor::sqlite(max + 1),
                });
            }
            ChangeType::Update | ChangeType::Delete => {
                if force_write {
                    if op == ChangeType::Delete {
                        // The row is already gone; nothing left to force
                        return Ok(());
                    }
                    // Forced update against a vanished row: replay it as
                    // an insert to bring the row back
                    op = ChangeType::Insert;
                    continue;
                }

                let decision = match resolver.as_deref_mut() {
                    Some(resolve) => resolve(item),
                    None => ConflictResolution::Skip,
                };
                match decision {
                    ConflictResolution::ForceWrite => {
                        force_write = true;
                    }
                    ConflictResolution::Skip => {
                        tracing::debug!(
                            "Skipped conflicting {:?} on '{}'",
                            op,
                            runtime.config.qualified_name()
                        );
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Bind and run the template for one operation, returning the affected
/// row count. Every parameter the statement declares is bound: the two
/// control parameters from the loop state, column parameters from the
/// item's values, and SQL NULL for columns the item does not carry.
fn execute_template(
    conn: &Connection,
    runtime: &TableRuntime,
    op: ChangeType,
    item: &ChangeItem,
    base_version: i64,
    force_write: bool,
) -> Result<usize> {
    let sql = match op {
        ChangeType::Insert => &runtime.templates.insert,
        ChangeType::Update => &runtime.templates.update,
        ChangeType::Delete => &runtime.templates.delete,
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let parameter_names: Vec<Option<String>> = (1..=stmt.parameter_count())
        .map(|idx| stmt.parameter_name(idx).map(str::to_string))
        .collect();

    for (offset, name) in parameter_names.iter().enumerate() {
        let Some(name) = name else { continue };
        let value = if name == PARAM_LAST_SYNC_VERSION {
            rusqlite::types::Value::Integer(base_version)
        } else if name == PARAM_SYNC_FORCE_WRITE {
            rusqlite::types::Value::Integer(i64::from(force_write))
        } else {
            runtime
                .param_to_column
                .get(name)
                .and_then(|column| item.values.get(column))
                .map(json_to_sqlite_value)
                .unwrap_or(rusqlite::types::Value::Null)
        };
        stmt.raw_bind_parameter(offset + 1, value)?;
    }

    let affected = stmt.raw_execute()?;
    Ok(affected)
}
