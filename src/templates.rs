// ABOUTME: Precomputed conflict-aware DML templates for each synchronized table
// ABOUTME: Insert, update, and delete statements with named parameters and the conflict predicate

use crate::schema::{primary_key_columns, ColumnInfo};
use crate::tracking::CHANGE_LOG_TABLE;

/// Named parameter carrying the caller's base version.
pub const PARAM_LAST_SYNC_VERSION: &str = "@last_sync_version";
/// Named parameter overriding the conflict check when bound to 1.
pub const PARAM_SYNC_FORCE_WRITE: &str = "@sync_force_write";

/// The three parameterized statements used to replay changes on a table.
///
/// All statements are idempotent and carry their conflict detection in
/// the WHERE clause, so the check and the mutation are one atomic
/// statement with no read-then-write race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTemplates {
    pub insert: String,
    pub update: String,
    pub delete: String,
}

/// Quote a SQL identifier (table, column) by doubling embedded quotes.
///
/// # Examples
///
/// ```
/// use sqlite_rowsync::templates::quote_ident;
/// assert_eq!(quote_ident("Users"), "\"Users\"");
/// assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
/// ```
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a SQL string literal by doubling embedded single quotes.
///
/// # Examples
///
/// ```
/// use sqlite_rowsync::templates::quote_literal;
/// assert_eq!(quote_literal("hello"), "'hello'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Named parameter for a column value.
///
/// Spaces in the column name are normalized to underscores in the
/// parameter name only; the SQL identifier keeps the original spelling.
///
/// # Examples
///
/// ```
/// use sqlite_rowsync::templates::param_name;
/// assert_eq!(param_name("Email"), "@Email");
/// assert_eq!(param_name("Zip Code"), "@Zip_Code");
/// ```
pub fn param_name(column: &str) -> String {
    format!("@{}", column.replace(' ', "_"))
}

/// Build the DML templates for one table.
///
/// The update and delete WHERE clauses embed the conflict predicate: the
/// statement only touches the row when the caller has seen every local
/// change, that is, when no change-log entry for the row is newer than
/// `@last_sync_version`. Binding `@sync_force_write` to 1 bypasses the
/// predicate.
pub fn build(schema: &str, table: &str, columns: &[ColumnInfo]) -> TableTemplates {
    let target = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let qualified_literal = quote_literal(&format!("{schema}.{table}"));
    let pk = primary_key_columns(columns);

    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let value_list: Vec<String> = columns.iter().map(|c| param_name(&c.name)).collect();

    // A re-applied insert hits the primary-key collision and reports 0
    // affected rows instead of an error; the applier decides what that
    // means.
    let insert = format!(
        "INSERT OR IGNORE INTO {target} ({}) VALUES ({})",
        column_list.join(", "),
        value_list.join(", ")
    );

    let conflict_free = format!(
        "NOT EXISTS (SELECT 1 FROM {log} AS CT \
         WHERE CT.TBL = {qualified_literal} \
         AND CT.PK = {fingerprint} \
         AND CT.ID > {version})",
        log = quote_ident(CHANGE_LOG_TABLE),
        fingerprint = crate::fingerprint::fingerprint_expr(&quote_ident(table), &pk),
        version = PARAM_LAST_SYNC_VERSION,
    );

    let pk_match: Vec<String> = pk
        .iter()
        .map(|c| format!("{} = {}", quote_ident(&c.name), param_name(&c.name)))
        .collect();

    // Tables whose every column is part of the key still need a SET
    // clause; assigning the key to itself keeps the statement well-formed.
    let non_pk: Vec<&ColumnInfo> = columns.iter().filter(|c| !c.primary_key).collect();
    let set_source: Vec<&ColumnInfo> = if non_pk.is_empty() {
        columns.iter().collect()
    } else {
        non_pk
    };
    let set_list: Vec<String> = set_source
        .iter()
        .map(|c| format!("{} = {}", quote_ident(&c.name), param_name(&c.name)))
        .collect();

    let update = format!(
        "UPDATE {target} SET {} WHERE {} AND ({force} = 1 OR {conflict_free})",
        set_list.join(", "),
        pk_match.join(" AND "),
        force = PARAM_SYNC_FORCE_WRITE,
    );

    let delete = format!(
        "DELETE FROM {target} WHERE {} AND ({force} = 1 OR {conflict_free})",
        pk_match.join(" AND "),
        force = PARAM_SYNC_FORCE_WRITE,
    );

    tracing::debug!("Built DML templates for '{}.{}'", schema, table);

    TableTemplates {
        insert,
        update,
        delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "Id".to_string(),
                declared_type: "INTEGER".to_string(),
                primary_key: true,
            },
            ColumnInfo {
                name: "Email".to_string(),
                declared_type: "TEXT".to_string(),
                primary_key: false,
            },
            ColumnInfo {
                name: "Zip Code".to_string(),
                declared_type: "TEXT".to_string(),
                primary_key: false,
            },
        ]
    }

    #[test]
    fn insert_uses_or_ignore_and_all_columns() {
        let t = build("main", "Users", &users_columns());
        assert_eq!(
            t.insert,
            r#"INSERT OR IGNORE INTO "main"."Users" ("Id", "Email", "Zip Code") VALUES (@Id, @Email, @Zip_Code)"#
        );
    }

    #[test]
    fn update_sets_non_key_columns_and_embeds_conflict_predicate() {
        let t = build("main", "Users", &users_columns());
        assert!(t.update.starts_with(
            r#"UPDATE "main"."Users" SET "Email" = @Email, "Zip Code" = @Zip_Code WHERE "Id" = @Id"#
        ));
        assert!(t.update.contains("@sync_force_write = 1 OR NOT EXISTS"));
        assert!(t.update.contains("CT.TBL = 'main.Users'"));
        assert!(t.update.contains(r#"CT.PK = printf('%d', "Users"."Id")"#));
        assert!(t.update.contains("CT.ID > @last_sync_version"));
    }

    #[test]
    fn delete_shares_the_update_where_shape() {
        let t = build("main", "Users", &users_columns());
        assert!(t
            .delete
            .starts_with(r#"DELETE FROM "main"."Users" WHERE "Id" = @Id"#));
        assert!(t.delete.contains("@sync_force_write = 1 OR NOT EXISTS"));
    }

    #[test]
    fn all_key_table_sets_its_own_key() {
        let columns = vec![ColumnInfo {
            name: "Tag".to_string(),
            declared_type: "TEXT".to_string(),
            primary_key: true,
        }];
        let t = build("main", "Tags", &columns);
        assert!(t.update.contains(r#"SET "Tag" = @Tag"#));
    }
}
