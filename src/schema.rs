// ABOUTME: SQLite schema introspection for configured tables
// ABOUTME: Reads column names, declared types, and primary-key flags in declaration order

use rusqlite::Connection;

use crate::error::{Result, SyncError};

/// One column of a synchronized table, as discovered from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub primary_key: bool,
}

/// Read column metadata for a table, in declaration order.
///
/// # Arguments
///
/// * `conn` - SQLite database connection
/// * `schema` - Schema qualifier ("main" for the default database)
/// * `table` - Table name
///
/// # Errors
///
/// A table SQLite knows nothing about yields no metadata rows, which is
/// indistinguishable from a table with no columns; both are reported as
/// a configuration error.
///
/// # Examples
///
/// ```no_run
/// # use sqlite_rowsync::schema::table_columns;
/// # fn example() -> sqlite_rowsync::error::Result<()> {
/// let conn = rusqlite::Connection::open("app.db")?;
/// let columns = table_columns(&conn, "main", "Users")?;
/// for column in &columns {
///     println!("{} {}", column.name, column.declared_type);
/// }
/// # Ok(())
/// # }
/// ```
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    tracing::debug!("Reading column metadata for '{}.{}'", schema, table);

    let mut stmt = conn.prepare(
        "SELECT name, type, pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )?;

    let columns = stmt
        .query_map([table, schema], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                primary_key: row.get::<_, i64>(2)? > 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(SyncError::Configuration(format!(
            "table '{schema}.{table}' does not exist or has no columns"
        )));
    }

    tracing::debug!(
        "Table '{}.{}' has {} columns ({} primary key)",
        schema,
        table,
        columns.len(),
        columns.iter().filter(|c| c.primary_key).count()
    );

    Ok(columns)
}

/// Split discovered columns into primary-key and remaining columns,
/// preserving declaration order.
pub fn primary_key_columns(columns: &[ColumnInfo]) -> Vec<&ColumnInfo> {
    columns.iter().filter(|c| c.primary_key).collect()
}
