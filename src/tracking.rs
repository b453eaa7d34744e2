// ABOUTME: Change-log table and trigger installation
// ABOUTME: One sidecar table plus three AFTER triggers per synchronized table

use rusqlite::Connection;

use crate::error::{Result, SyncError};
use crate::fingerprint::fingerprint_expr;
use crate::schema::{primary_key_columns, ColumnInfo};
use crate::templates::{quote_ident, quote_literal};

/// Name of the sidecar change-log table.
pub const CHANGE_LOG_TABLE: &str = "__CORE_SYNC_CT";

/// Sidecar log schema. The rowid alias is the global version: strictly
/// increasing, one entry per row-level mutation.
const CHANGE_LOG_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS \"__CORE_SYNC_CT\" (
    ID  INTEGER PRIMARY KEY,
    TBL TEXT NOT NULL,
    OP  CHAR NOT NULL,
    PK  TEXT NOT NULL
)";

/// Create the change-log table if it is absent.
pub fn ensure_change_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(CHANGE_LOG_SCHEMA)?;
    Ok(())
}

/// Install the three change-tracking triggers for one table.
///
/// Trigger names are derived from the table name, so the
/// `CREATE TRIGGER IF NOT EXISTS` form makes repeated installation a
/// no-op. Each trigger appends one change-log row in the transaction of
/// the mutation it observes; insert and update fingerprints read `NEW`,
/// delete fingerprints read `OLD`.
///
/// # Errors
///
/// A table with no discoverable primary key cannot produce usable
/// fingerprints and is reported as a configuration error.
pub fn install_triggers(
    conn: &Connection,
    schema: &str,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<()> {
    let pk = primary_key_columns(columns);
    if pk.is_empty() {
        return Err(SyncError::Configuration(format!(
            "table '{schema}.{table}' has no primary key"
        )));
    }

    let mut script = String::new();
    for (suffix, event, row) in [
        ("INSERT", "INSERT", "NEW"),
        ("UPDATE", "UPDATE", "NEW"),
        ("DELETE", "DELETE", "OLD"),
    ] {
        let trigger = format!(
            "CREATE TRIGGER IF NOT EXISTS {schema_q}.{name} AFTER {event} ON {table_q}\n\
             BEGIN\n\
                 INSERT INTO {log} (TBL, OP, PK) VALUES ({tbl}, {op}, {fingerprint});\n\
             END;\n",
            schema_q = quote_ident(schema),
            name = quote_ident(&trigger_name(table, suffix)),
            table_q = quote_ident(table),
            log = quote_ident(CHANGE_LOG_TABLE),
            tbl = quote_literal(&format!("{schema}.{table}")),
            op = quote_literal(&suffix[..1]),
            fingerprint = fingerprint_expr(row, &pk),
        );
        script.push_str(&trigger);
    }

    conn.execute_batch(&script)?;

    tracing::debug!("Installed change-tracking triggers for '{}.{}'", schema, table);

    Ok(())
}

/// Stable trigger name for a table and event suffix.
pub fn trigger_name(table: &str, suffix: &str) -> String {
    format!("__{table}_ct-{suffix}__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table_columns;

    fn conn_with_users() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Users (Id INTEGER PRIMARY KEY, Email TEXT, Name TEXT)",
        )
        .unwrap();
        conn
    }

    fn log_rows(conn: &Connection) -> Vec<(i64, String, String, String)> {
        let mut stmt = conn
            .prepare("SELECT ID, TBL, OP, PK FROM \"__CORE_SYNC_CT\" ORDER BY ID")
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap()
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap()
    }

    #[test]
    fn triggers_record_every_mutation() {
        let conn = conn_with_users();
        let columns = table_columns(&conn, "main", "Users").unwrap();
        ensure_change_log(&conn).unwrap();
        install_triggers(&conn, "main", "Users", &columns).unwrap();

        conn.execute(
            "INSERT INTO Users (Id, Email, Name) VALUES (1, 'a@b', 'U1')",
            [],
        )
        .unwrap();
        conn.execute("UPDATE Users SET Name = 'U2' WHERE Id = 1", [])
            .unwrap();
        conn.execute("DELETE FROM Users WHERE Id = 1", []).unwrap();

        let rows = log_rows(&conn);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (1, "main.Users".to_string(), "I".to_string(), "1".to_string()));
        assert_eq!(rows[1].2, "U");
        assert_eq!(rows[2].2, "D");
        assert_eq!(rows[2].3, "1");
    }

    #[test]
    fn installation_is_idempotent() {
        let conn = conn_with_users();
        let columns = table_columns(&conn, "main", "Users").unwrap();
        ensure_change_log(&conn).unwrap();
        install_triggers(&conn, "main", "Users", &columns).unwrap();
        install_triggers(&conn, "main", "Users", &columns).unwrap();
        ensure_change_log(&conn).unwrap();

        conn.execute("INSERT INTO Users (Id) VALUES (9)", []).unwrap();
        // One entry per mutation, not one per installation
        assert_eq!(log_rows(&conn).len(), 1);
    }

    #[test]
    fn table_without_primary_key_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE Loose (A INTEGER, B TEXT)")
            .unwrap();
        ensure_change_log(&conn).unwrap();
        let columns = table_columns(&conn, "main", "Loose").unwrap();
        let err = install_triggers(&conn, "main", "Loose", &columns).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
