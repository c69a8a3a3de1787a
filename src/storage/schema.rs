//! Catalog schema, identifier rules and table introspection helpers.

use std::sync::OnceLock;

use duckdb::{Connection, OptionalExt, params};
use regex::Regex;

use crate::storage::StorageError;
use crate::storage::types::{CellValue, Record, TableInfo, WriteMode, micros_to_datetime};

/// Name of the injected run timestamp column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Prefix reserved for internal tables.
pub const RESERVED_PREFIX: &str = "snapshot_";

/// SQL statement for creating the snapshot catalog.
///
/// One row per snapshot table; the physical table holds the generations.
pub const CATALOG_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot_catalog (
    table_name  VARCHAR PRIMARY KEY,
    write_mode  VARCHAR NOT NULL,
    created_at  BIGINT NOT NULL,
    updated_at  BIGINT NOT NULL
);
"#;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(CATALOG_TABLE_DDL)?;
    tracing::info!("Snapshot catalog initialized");
    Ok(())
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("failed to compile identifier regex")
    })
}

/// Validate a table name and normalize it to lower case.
pub fn normalize_table_name(name: &str) -> Result<String, StorageError> {
    let name = name.trim();
    if !identifier_regex().is_match(name) {
        return Err(StorageError::InvalidIdentifier(format!(
            "table name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    let normalized = name.to_ascii_lowercase();
    if normalized.starts_with(RESERVED_PREFIX) {
        return Err(StorageError::InvalidIdentifier(format!(
            "table name '{name}' uses the reserved prefix '{RESERVED_PREFIX}'"
        )));
    }
    Ok(normalized)
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column set of one write, checked for consistency across rows.
///
/// Returns the columns in record (lexical) order.
pub fn collect_columns(table: &str, rows: &[Record]) -> Result<Vec<String>, StorageError> {
    let Some(first) = rows.first() else {
        return Err(StorageError::EmptyGeneration(table.to_string()));
    };

    for (idx, row) in rows.iter().enumerate().skip(1) {
        if row.len() != first.len() || !row.keys().eq(first.keys()) {
            return Err(StorageError::InconsistentColumns {
                table: table.to_string(),
                row: idx,
            });
        }
    }

    let mut seen = std::collections::HashSet::new();
    for column in first.keys() {
        if column.is_empty() {
            return Err(StorageError::InvalidIdentifier(format!(
                "empty column name in '{table}'"
            )));
        }
        if column.eq_ignore_ascii_case(TIMESTAMP_COLUMN) {
            return Err(StorageError::ReservedColumn(column.clone()));
        }
        // DuckDB resolves identifiers case-insensitively.
        if !seen.insert(column.to_ascii_lowercase()) {
            return Err(StorageError::InvalidIdentifier(format!(
                "column '{column}' collides with another column of '{table}'"
            )));
        }
    }

    // JSON has no encoding for NaN or infinity.
    for row in rows {
        let non_finite = row
            .iter()
            .find(|(_, value)| matches!(value, CellValue::Float(f) if !f.is_finite()));
        if let Some((column, _)) = non_finite {
            return Err(StorageError::NonFiniteFloat {
                table: table.to_string(),
                column: column.clone(),
            });
        }
    }

    Ok(first.keys().cloned().collect())
}

/// Look up the catalog entry of a table.
pub fn catalog_entry(conn: &Connection, table: &str) -> Result<Option<TableInfo>, StorageError> {
    let entry = conn
        .query_row(
            "SELECT table_name, write_mode, created_at, updated_at
             FROM snapshot_catalog WHERE table_name = ?",
            params![table],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    entry
        .map(|(name, mode, created_at, updated_at)| {
            let write_mode = mode.parse::<WriteMode>().map_err(|_| {
                StorageError::Internal(format!("unknown write mode '{mode}' for '{name}'"))
            })?;
            Ok(TableInfo {
                name,
                write_mode,
                created_at: micros_to_datetime(created_at),
                updated_at: micros_to_datetime(updated_at),
            })
        })
        .transpose()
}

/// Ordered column names of a table, excluding the timestamp column.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_name = ? ORDER BY ordinal_position",
    )?;
    let columns = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns
        .into_iter()
        .filter(|c| !c.eq_ignore_ascii_case(TIMESTAMP_COLUMN))
        .collect())
}

/// Newest generation timestamp of a table (micros), if it has any rows.
pub fn latest_timestamp(conn: &Connection, table: &str) -> Result<Option<i64>, StorageError> {
    let sql = format!(
        "SELECT MAX({ts}) FROM {table}",
        ts = quote_ident(TIMESTAMP_COLUMN),
        table = quote_ident(table),
    );
    Ok(conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))?)
}
