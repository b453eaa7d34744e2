// ABOUTME: Incremental change extraction since a caller-supplied anchor
// ABOUTME: Joins the change-log to the target tables and collapses per-row operations

use rusqlite::Connection;
use serde_json::Map;

use crate::changes::{Anchor, ChangeItem, ChangeSet, ChangeType};
use crate::error::Result;
use crate::fingerprint;
use crate::schema::primary_key_columns;
use crate::templates::{quote_ident, quote_literal};
use crate::tracking::CHANGE_LOG_TABLE;

use super::{check_anchor_age, log_bounds, row_values, SyncProvider, TableRuntime};

impl SyncProvider {
    /// Changes recorded since `anchor`, one item per modified row.
    ///
    /// Multiple operations on the same row collapse to a single item by
    /// taking the alphabetically smallest operation code ('D' < 'I' <
    /// 'U'): a delete outranks everything, an insert outranks an update.
    /// Rows that vanished from the target without a recorded delete are
    /// dropped.
    ///
    /// The returned anchor is the store's version at extraction time;
    /// feeding it back yields an empty change set until new writes
    /// arrive.
    ///
    /// # Errors
    ///
    /// [`SyncError::IncompatibleAnchor`](crate::error::SyncError) when
    /// the anchor was issued by another provider kind, and
    /// [`SyncError::AnchorTooOld`](crate::error::SyncError) when the
    /// change history needed to serve the request is no longer retained.
    pub fn get_incremental_changes(&self, anchor: &Anchor) -> Result<ChangeSet> {
        let since = anchor.expect_sqlite()?;
        let tables = self.ensure_initialized()?;
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let (max, min) = log_bounds(&tx)?;
        check_anchor_age(since, min)?;

        let mut items = Vec::new();
        for runtime in tables.iter().filter(|t| t.extracted()) {
            collect_table_changes(&tx, runtime, since, &mut items)?;
        }
        tx.commit()?;

        tracing::debug!(
            "Extracted {} change items between versions {} and {}",
            items.len(),
            since,
            max
        );

        Ok(ChangeSet {
            anchor: Anchor::sqlite(max),
            items,
        })
    }
}

fn collect_table_changes(
    conn: &Connection,
    runtime: &TableRuntime,
    since: i64,
    items: &mut Vec<ChangeItem>,
) -> Result<()> {
    let pk = primary_key_columns(&runtime.columns);
    let first_pk_index = runtime
        .columns
        .iter()
        .position(|c| c.primary_key)
        .unwrap_or(0);

    let column_list: String = runtime
        .columns
        .iter()
        .map(|c| format!(", T.{}", quote_ident(&c.name)))
        .collect();

    // One group per touched fingerprint. The LEFT JOIN keeps deleted
    // rows visible from the change-log side; the TBL filter keeps other
    // tables' fingerprints out of this table's result.
    let sql = format!(
        "SELECT CT.PK, MIN(CT.OP){column_list} \
         FROM {log} AS CT \
         LEFT JOIN {schema}.{table} AS T ON CT.PK = {fingerprint} \
         WHERE CT.TBL = {qualified} AND CT.ID > ?1 \
         GROUP BY CT.PK \
         ORDER BY MIN(CT.ID)",
        log = quote_ident(CHANGE_LOG_TABLE),
        schema = quote_ident(&runtime.config.schema),
        table = quote_ident(&runtime.config.name),
        fingerprint = fingerprint::fingerprint_expr("T", &pk),
        qualified = quote_literal(&runtime.config.qualified_name()),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([since], |row| {
            let fingerprint: String = row.get(0)?;
            let op: String = row.get(1)?;
            // A primary key cannot be NULL, so a NULL here means the
            // LEFT JOIN found no target row
            let row_present = row.get::<_, rusqlite::types::Value>(2 + first_pk_index)?
                != rusqlite::types::Value::Null;
            let values = if row_present {
                row_values(runtime, row, 2)?
            } else {
                Map::new()
            };
            Ok((fingerprint, op, row_present, values))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (fingerprint, op, row_present, values) in rows {
        if row_present {
            items.push(ChangeItem {
                schema: runtime.config.schema.clone(),
                table: runtime.config.name.clone(),
                change_type: ChangeType::from_op_code(&op)?,
                values,
            });
        } else if op == "D" {
            // The row is gone; reconstruct its key from the fingerprint
            // so the peer can address its own copy
            match fingerprint::decode(&fingerprint, &pk) {
                Some(key_values) => items.push(ChangeItem {
                    schema: runtime.config.schema.clone(),
                    table: runtime.config.name.clone(),
                    change_type: ChangeType::Delete,
                    values: key_values.into_iter().collect(),
                }),
                None => {
                    tracing::warn!(
                        "Dropping delete for '{}': fingerprint '{}' does not decode",
                        runtime.config.qualified_name(),
                        fingerprint
                    );
                }
            }
        }
        // A vanished row without a recorded delete has nothing to report
    }

    Ok(())
}
