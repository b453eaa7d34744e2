// ABOUTME: Primary-key fingerprints for change-log rows
// ABOUTME: Builds the printf expression triggers and queries share, and decodes it for deletes

use serde_json::Value as JsonValue;

use crate::schema::ColumnInfo;

/// Separator between formatted key parts in a multi-column fingerprint.
///
/// Without a separator, composite keys could alias each other: (12, "3a")
/// and (123, "a") would both print "123a". Text values containing the
/// separator can still alias inside composite keys; single-column keys
/// are always exact.
const SEPARATOR: &str = "|";

/// printf format token for one primary-key column.
///
/// Integer-affinity columns print as decimal digits, everything else
/// verbatim. Equal keys always produce equal fingerprints regardless of
/// how the driver surfaces the value.
///
/// # Examples
///
/// ```
/// # use sqlite_rowsync::fingerprint::format_token;
/// assert_eq!(format_token("INTEGER"), "%d");
/// assert_eq!(format_token("smallint"), "%d");
/// assert_eq!(format_token("TEXT"), "%s");
/// assert_eq!(format_token(""), "%s");
/// ```
pub fn format_token(declared_type: &str) -> &'static str {
    // SQLite affinity rule: any type name containing "INT" is an integer
    if declared_type.to_ascii_uppercase().contains("INT") {
        "%d"
    } else {
        "%s"
    }
}

/// SQL expression computing a row's fingerprint.
///
/// `qualifier` is the row source the primary-key columns are read from:
/// `NEW` or `OLD` inside a trigger body, or the target table's name in a
/// join or conflict predicate.
///
/// # Examples
///
/// ```
/// # use sqlite_rowsync::fingerprint::fingerprint_expr;
/// # use sqlite_rowsync::schema::ColumnInfo;
/// let id = ColumnInfo {
///     name: "Id".to_string(),
///     declared_type: "INTEGER".to_string(),
///     primary_key: true,
/// };
/// assert_eq!(fingerprint_expr("NEW", &[&id]), r#"printf('%d', NEW."Id")"#);
/// ```
pub fn fingerprint_expr(qualifier: &str, pk_columns: &[&ColumnInfo]) -> String {
    let format: Vec<&str> = pk_columns
        .iter()
        .map(|c| format_token(&c.declared_type))
        .collect();
    let args: Vec<String> = pk_columns
        .iter()
        .map(|c| format!("{qualifier}.{}", crate::templates::quote_ident(&c.name)))
        .collect();
    format!(
        "printf('{}', {})",
        format.join(SEPARATOR),
        args.join(", ")
    )
}

/// Recover primary-key values from a change-log fingerprint.
///
/// Used for delete items, where the target row no longer exists and the
/// fingerprint is the only record of which row was removed. Returns
/// `None` when the fingerprint does not split into one part per key
/// column.
pub fn decode(fingerprint: &str, pk_columns: &[&ColumnInfo]) -> Option<Vec<(String, JsonValue)>> {
    let parts: Vec<&str> = if pk_columns.len() == 1 {
        vec![fingerprint]
    } else {
        fingerprint.split(SEPARATOR).collect()
    };
    if parts.len() != pk_columns.len() {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for (column, part) in pk_columns.iter().zip(parts) {
        let value = if format_token(&column.declared_type) == "%d" {
            JsonValue::Number(part.parse::<i64>().ok()?.into())
        } else {
            JsonValue::String(part.to_string())
        };
        values.push((column.name.clone(), value));
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, declared_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            primary_key: true,
        }
    }

    #[test]
    fn single_integer_key() {
        let id = column("Id", "INTEGER");
        assert_eq!(fingerprint_expr("NEW", &[&id]), r#"printf('%d', NEW."Id")"#);
        assert_eq!(
            decode("42", &[&id]).unwrap(),
            vec![("Id".to_string(), serde_json::json!(42))]
        );
    }

    #[test]
    fn composite_key_uses_separator() {
        let a = column("A", "INTEGER");
        let b = column("B", "TEXT");
        assert_eq!(
            fingerprint_expr("OLD", &[&a, &b]),
            r#"printf('%d|%s', OLD."A", OLD."B")"#
        );
        assert_eq!(
            decode("7|west", &[&a, &b]).unwrap(),
            vec![
                ("A".to_string(), serde_json::json!(7)),
                ("B".to_string(), serde_json::json!("west")),
            ]
        );
    }

    #[test]
    fn text_key_is_verbatim() {
        let code = column("Code", "TEXT");
        assert_eq!(
            decode("12", &[&code]).unwrap(),
            vec![("Code".to_string(), serde_json::json!("12"))]
        );
    }

    #[test]
    fn malformed_fingerprints_decode_to_none() {
        let a = column("A", "INTEGER");
        let b = column("B", "TEXT");
        assert!(decode("only-one-part", &[&a, &b]).is_none());
        assert!(decode("not-a-number", &[&a]).is_none());
    }
}
