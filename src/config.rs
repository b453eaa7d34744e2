// ABOUTME: Synchronization configuration and validation
// ABOUTME: Connection string plus the ordered list of tables to keep in sync

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::values::ColumnKind;

/// Which way changes flow for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Changes are both produced by and applied to this table.
    #[default]
    Bidirectional,
    /// Changes are only applied to this table; local edits are never
    /// extracted.
    PullOnly,
}

/// Declaration of one table to synchronize.
///
/// Column metadata is discovered at initialization; the declaration only
/// names the table and, optionally, a per-column coercion schema used to
/// normalize extracted values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub schema: String,
    pub direction: SyncDirection,
    /// Declared value kind per column. Columns not listed keep the
    /// driver's native value.
    pub column_kinds: BTreeMap<String, ColumnKind>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: "main".to_string(),
            direction: SyncDirection::Bidirectional,
            column_kinds: BTreeMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn pull_only(mut self) -> Self {
        self.direction = SyncDirection::PullOnly;
        self
    }

    pub fn with_column_kind(mut self, column: impl Into<String>, kind: ColumnKind) -> Self {
        self.column_kinds.insert(column.into(), kind);
        self
    }

    /// Fully qualified name as recorded in the change-log.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Validated synchronization configuration.
///
/// # Examples
///
/// ```
/// # use sqlite_rowsync::config::{SyncConfig, TableConfig};
/// let config = SyncConfig::new(
///     "app.db",
///     vec![TableConfig::new("Users"), TableConfig::new("Orders")],
/// )
/// .unwrap();
/// assert_eq!(config.tables.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub connection_string: String,
    pub tables: Vec<TableConfig>,
}

impl SyncConfig {
    /// Build a configuration, rejecting invalid input up front.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] when the connection string is
    /// empty, a table is declared twice, or an identifier contains a
    /// quote character. Table and column names are interpolated into SQL
    /// after quoting, so quote characters are refused outright.
    pub fn new(connection_string: impl Into<String>, tables: Vec<TableConfig>) -> Result<Self> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(SyncError::Configuration(
                "connection string cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for table in &tables {
            validate_identifier("table name", &table.name)?;
            validate_identifier("schema name", &table.schema)?;
            for column in table.column_kinds.keys() {
                validate_identifier("column name", column)?;
            }
            if !seen.insert(table.qualified_name()) {
                return Err(SyncError::Configuration(format!(
                    "table '{}' is declared more than once",
                    table.qualified_name()
                )));
            }
        }

        Ok(Self {
            connection_string,
            tables,
        })
    }
}

fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SyncError::Configuration(format!("{what} cannot be empty")));
    }
    if value.contains('"') || value.contains('\'') {
        return Err(SyncError::Configuration(format!(
            "{what} '{value}' contains a quote character"
        )));
    }
    Ok(())
}
