// ABOUTME: The synchronization provider and its memoized per-table runtime
// ABOUTME: Initialization, initial-set extraction, and the anchor and version service

mod apply;
mod extract;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};

use crate::changes::{Anchor, ChangeItem, ChangeSet, ChangeType};
use crate::config::{SyncConfig, SyncDirection, TableConfig};
use crate::error::{Result, SyncError};
use crate::schema::{table_columns, ColumnInfo};
use crate::templates::{self, param_name, quote_ident, TableTemplates};
use crate::tracking::{ensure_change_log, install_triggers, CHANGE_LOG_TABLE};
use crate::values::{coerce, sqlite_value_to_json};

/// Everything the provider needs to know about one table after
/// initialization. Built once, then read-only.
pub(crate) struct TableRuntime {
    pub(crate) config: TableConfig,
    pub(crate) columns: Vec<ColumnInfo>,
    pub(crate) templates: TableTemplates,
    /// Normalized parameter name (with the `@` prefix) back to the SQL
    /// column name it binds.
    pub(crate) param_to_column: HashMap<String, String>,
}

impl TableRuntime {
    pub(crate) fn extracted(&self) -> bool {
        self.config.direction != SyncDirection::PullOnly
    }
}

/// Bidirectional synchronization provider for one SQLite database.
///
/// Each public operation opens its own connection and runs under a
/// single transaction; the provider itself holds no connection and no
/// mutable state beyond the memoized per-table runtime built by
/// [`initialize`](Self::initialize).
///
/// # Examples
///
/// ```no_run
/// # use sqlite_rowsync::config::{SyncConfig, TableConfig};
/// # use sqlite_rowsync::provider::SyncProvider;
/// # fn example() -> sqlite_rowsync::error::Result<()> {
/// let config = SyncConfig::new("app.db", vec![TableConfig::new("Users")])?;
/// let provider = SyncProvider::new(config);
/// provider.initialize()?;
/// let snapshot = provider.get_initial_set()?;
/// println!("{} rows at version {}", snapshot.items.len(), snapshot.anchor.version);
/// # Ok(())
/// # }
/// ```
pub struct SyncProvider {
    config: SyncConfig,
    runtime: Mutex<Option<Arc<Vec<TableRuntime>>>>,
}

impl SyncProvider {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            runtime: Mutex::new(None),
        }
    }

    /// Prepare the store for change tracking.
    ///
    /// Introspects every configured table, creates the change-log table,
    /// installs the tracking triggers, and builds the DML templates. The
    /// first caller does the work; later calls reuse the memoized
    /// runtime. All DDL uses the IF NOT EXISTS form, so a fresh process
    /// re-running initialization against an already prepared store
    /// changes nothing.
    pub fn initialize(&self) -> Result<()> {
        self.ensure_initialized().map(|_| ())
    }

    pub(crate) fn ensure_initialized(&self) -> Result<Arc<Vec<TableRuntime>>> {
        let mut guard = self
            .runtime
            .lock()
            .expect("provider initialization lock poisoned");
        if let Some(runtime) = guard.as_ref() {
            return Ok(runtime.clone());
        }

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        ensure_change_log(&tx)?;

        let mut tables = Vec::with_capacity(self.config.tables.len());
        for table in &self.config.tables {
            let columns = table_columns(&tx, &table.schema, &table.name)?;
            install_triggers(&tx, &table.schema, &table.name, &columns)?;
            let param_to_column = columns
                .iter()
                .map(|c| (param_name(&c.name), c.name.clone()))
                .collect();
            tables.push(TableRuntime {
                templates: templates::build(&table.schema, &table.name, &columns),
                config: table.clone(),
                columns,
                param_to_column,
            });
        }
        tx.commit()?;

        tracing::info!("Change tracking initialized for {} tables", tables.len());

        let runtime = Arc::new(tables);
        *guard = Some(runtime.clone());
        Ok(runtime)
    }

    /// Every row of every extracted table, tagged as an insert, together
    /// with the store's current version. Used once to seed a fresh peer.
    pub fn get_initial_set(&self) -> Result<ChangeSet> {
        let tables = self.ensure_initialized()?;
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let (max, _) = log_bounds(&tx)?;

        let mut items = Vec::new();
        for runtime in tables.iter().filter(|t| t.extracted()) {
            let column_list: Vec<String> = runtime
                .columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect();
            let sql = format!(
                "SELECT {} FROM {}.{}",
                column_list.join(", "),
                quote_ident(&runtime.config.schema),
                quote_ident(&runtime.config.name),
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| row_values(runtime, row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            tracing::debug!(
                "Initial set: {} rows from '{}'",
                rows.len(),
                runtime.config.qualified_name()
            );

            items.extend(rows.into_iter().map(|values| ChangeItem {
                schema: runtime.config.schema.clone(),
                table: runtime.config.name.clone(),
                change_type: ChangeType::Insert,
                values,
            }));
        }
        tx.commit()?;

        Ok(ChangeSet {
            anchor: Anchor::sqlite(max),
            items,
        })
    }

    /// The store's current version as an anchor.
    pub fn current_anchor(&self) -> Result<Anchor> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let (max, _) = log_bounds(&conn)?;
        Ok(Anchor::sqlite(max))
    }

    /// Number of change-log entries newer than an anchor.
    pub fn pending_since(&self, anchor: &Anchor) -> Result<i64> {
        let since = anchor.expect_sqlite()?;
        self.ensure_initialized()?;
        let conn = self.open()?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE ID > ?1",
                quote_ident(CHANGE_LOG_TABLE)
            ),
            [since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub(crate) fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.connection_string)?;
        Ok(conn)
    }

    pub(crate) fn table_runtime<'a>(
        tables: &'a [TableRuntime],
        item: &ChangeItem,
    ) -> Result<&'a TableRuntime> {
        tables
            .iter()
            .find(|t| t.config.name == item.table && t.config.schema == item.schema)
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "change item references unconfigured table '{}'",
                    item.qualified_table()
                ))
            })
    }
}

/// Current `(max, min)` change-log identifiers, 0 when the log is empty.
///
/// Read inside the caller's transaction so the returned version names
/// exactly the state the caller observes.
pub(crate) fn log_bounds(conn: &Connection) -> Result<(i64, i64)> {
    let bounds = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(ID), 0), COALESCE(MIN(ID), 0) FROM {}",
            quote_ident(CHANGE_LOG_TABLE)
        ),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(bounds)
}

/// An anchor is serviceable iff the log still retains every entry the
/// caller has not seen.
pub(crate) fn check_anchor_age(version: i64, oldest: i64) -> Result<()> {
    if version < oldest - 1 {
        return Err(SyncError::AnchorTooOld { version, oldest });
    }
    Ok(())
}

/// Read one result row into a column map, applying the table's declared
/// coercion kinds. `offset` is the index of the first table column in
/// the row.
pub(crate) fn row_values(
    runtime: &TableRuntime,
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> rusqlite::Result<Map<String, JsonValue>> {
    let mut values = Map::new();
    for (idx, column) in runtime.columns.iter().enumerate() {
        let raw: rusqlite::types::Value = row.get(offset + idx)?;
        let mut value = sqlite_value_to_json(&raw);
        if let Some(kind) = runtime.config.column_kinds.get(&column.name) {
            value = coerce(*kind, value);
        }
        values.insert(column.name.clone(), value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::Anchor;
    use crate::values::ColumnKind;
    use std::path::{Path, PathBuf};

    fn flags_db(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("flags.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Flags (Id INTEGER PRIMARY KEY, Label TEXT, Active INTEGER)",
        )
        .unwrap();
        path
    }

    fn flags_provider(path: &Path) -> SyncProvider {
        let config = SyncConfig::new(
            path.to_str().unwrap(),
            vec![TableConfig::new("Flags").with_column_kind("Active", ColumnKind::Bool)],
        )
        .unwrap();
        SyncProvider::new(config)
    }

    #[test]
    fn initial_set_contains_rows_inserted_before_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = flags_db(&dir);
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO Flags (Id, Label, Active) VALUES (1, 'beta', 1)",
            [],
        )
        .unwrap();

        let provider = flags_provider(&path);
        let snapshot = provider.get_initial_set().unwrap();

        // The row predates tracking, so it carries no version
        assert_eq!(snapshot.anchor.version, 0);
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].change_type, ChangeType::Insert);
        assert_eq!(snapshot.items[0].values["Label"], serde_json::json!("beta"));
    }

    #[test]
    fn declared_kinds_coerce_extracted_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = flags_db(&dir);
        let provider = flags_provider(&path);
        provider.initialize().unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO Flags (Id, Label, Active) VALUES (1, 'beta', 1)",
            [],
        )
        .unwrap();

        let changes = provider.get_incremental_changes(&Anchor::zero()).unwrap();
        assert_eq!(changes.items[0].values["Active"], serde_json::json!(true));
        assert_eq!(changes.items[0].values["Id"], serde_json::json!(1));
    }

    #[test]
    fn repeated_initialization_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = flags_db(&dir);

        let first = flags_provider(&path);
        first.initialize().unwrap();
        first.initialize().unwrap();
        // A second provider over the same store re-runs the DDL
        let second = flags_provider(&path);
        second.initialize().unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("INSERT INTO Flags (Id) VALUES (1)", []).unwrap();
        let logged: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"__CORE_SYNC_CT\"", [], |row| row.get(0))
            .unwrap();
        assert_eq!(logged, 1);
    }

    #[test]
    fn pending_since_counts_newer_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = flags_db(&dir);
        let provider = flags_provider(&path);
        provider.initialize().unwrap();

        let conn = Connection::open(&path).unwrap();
        for id in 1..=3 {
            conn.execute("INSERT INTO Flags (Id) VALUES (?1)", [id]).unwrap();
        }

        assert_eq!(provider.pending_since(&Anchor::zero()).unwrap(), 3);
        assert_eq!(provider.pending_since(&Anchor::sqlite(2)).unwrap(), 1);
        assert_eq!(provider.pending_since(&Anchor::sqlite(3)).unwrap(), 0);
    }
}
