//! Drift computation between the two newest generations of a table.
//!
//! Rows are aligned by their resource key projection, never by position, so
//! row order inside a generation cannot change the result.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::drift::model::{DiffRecord, DiffRequest, DriftReport, Transition};
use crate::storage::{CellValue, Generation, Record, SnapshotReader, StorageError};

/// Errors raised by a diff.
#[derive(Debug, Error)]
pub enum DriftError {
    /// Diff requested without key columns.
    #[error("resource key for '{table}' must name at least one column")]
    EmptyResourceKey { table: String },

    /// Key or monitored column missing from the table schema.
    #[error("column '{column}' does not exist in '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Two rows of one generation share a key projection.
    #[error("duplicate resource key {key:?} in '{table}' generation {timestamp}")]
    DuplicateResourceKey {
        table: String,
        key: Vec<CellValue>,
        timestamp: DateTime<Utc>,
    },

    /// Reading the store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read-only diff engine over the snapshot store.
#[derive(Debug, Clone)]
pub struct DriftEngine {
    reader: SnapshotReader,
}

type KeyIndex<'a> = BTreeMap<Vec<CellValue>, &'a Record>;

impl DriftEngine {
    pub fn new(reader: SnapshotReader) -> Self {
        Self { reader }
    }

    /// Diff every non-key column of `table`, aligned by `resource_key`.
    ///
    /// Returns an empty sequence while the table has fewer than two generations.
    pub fn diff<I, S>(&self, table: &str, resource_key: I) -> Result<Vec<DiffRecord>, DriftError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.diff_with(&DiffRequest::new(table, resource_key))?.records)
    }

    /// Diff with an explicit monitored column set.
    pub fn diff_with(&self, request: &DiffRequest) -> Result<DriftReport, DriftError> {
        let table = request.table.as_str();
        if request.resource_key.is_empty() {
            return Err(DriftError::EmptyResourceKey {
                table: table.to_string(),
            });
        }

        // Schema and generations come from one read transaction.
        let snapshot = self.reader.read_snapshot(table, 2)?;
        let schema = &snapshot.columns;
        let check = |column: &String| {
            if schema.contains(column) {
                Ok(())
            } else {
                Err(DriftError::UnknownColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })
            }
        };
        request.resource_key.iter().try_for_each(check)?;
        let candidates = match &request.columns {
            Some(columns) => {
                columns.iter().try_for_each(check)?;
                columns
            }
            None => schema,
        };
        let mut seen = HashSet::new();
        let monitored: Vec<String> = candidates
            .iter()
            .filter(|c| !request.resource_key.contains(c) && seen.insert(*c))
            .cloned()
            .collect();

        let generations = &snapshot.generations;
        let mut report = DriftReport {
            table: table.to_string(),
            resource_key: request.resource_key.clone(),
            previous: None,
            current: generations.first().map(|g| g.timestamp),
            records: Vec::new(),
        };
        let [current, previous, ..] = generations.as_slice() else {
            tracing::debug!(table, generations = generations.len(), "Not enough history to diff");
            return Ok(report);
        };
        report.previous = Some(previous.timestamp);

        let current_index = index_generation(table, current, &request.resource_key)?;
        let previous_index = index_generation(table, previous, &request.resource_key)?;
        report.records = compare(&previous_index, &current_index, &monitored);

        tracing::debug!(
            table,
            previous = %previous.timestamp,
            current = %current.timestamp,
            records = report.records.len(),
            "Diff computed"
        );
        Ok(report)
    }
}

/// Index rows by key projection, rejecting duplicates.
fn index_generation<'a>(
    table: &str,
    generation: &'a Generation,
    resource_key: &[String],
) -> Result<KeyIndex<'a>, DriftError> {
    let mut index = KeyIndex::new();
    for row in &generation.rows {
        let key: Vec<CellValue> = resource_key.iter().map(|c| cell(row, c)).collect();
        if index.contains_key(&key) {
            return Err(DriftError::DuplicateResourceKey {
                table: table.to_string(),
                key,
                timestamp: generation.timestamp,
            });
        }
        index.insert(key, row);
    }
    Ok(index)
}

/// Missing and `Null` read the same.
fn cell(row: &Record, column: &str) -> CellValue {
    row.get(column).cloned().unwrap_or_default()
}

fn compare(previous: &KeyIndex<'_>, current: &KeyIndex<'_>, monitored: &[String]) -> Vec<DiffRecord> {
    let mut records = Vec::new();

    for (key, row) in current {
        match previous.get(key) {
            None => presence(&mut records, key, row, monitored, Transition::Appeared),
            Some(old) => {
                for column in monitored {
                    let (before, after) = (cell(old, column), cell(row, column));
                    if before != after {
                        records.push(DiffRecord {
                            key: key.clone(),
                            field: Some(column.clone()),
                            previous: before,
                            current: after,
                            transition: Transition::Changed,
                        });
                    }
                }
            }
        }
    }
    for (key, row) in previous {
        if !current.contains_key(key) {
            presence(&mut records, key, row, monitored, Transition::Disappeared);
        }
    }

    records.sort_by(|a, b| (&a.key, &a.field).cmp(&(&b.key, &b.field)));
    records
}

/// Records for a key that exists on one side only.
fn presence(
    records: &mut Vec<DiffRecord>,
    key: &[CellValue],
    row: &Record,
    monitored: &[String],
    transition: Transition,
) {
    let split = |value: CellValue| match transition {
        Transition::Disappeared => (value, CellValue::Null),
        _ => (CellValue::Null, value),
    };

    if monitored.is_empty() {
        records.push(DiffRecord {
            key: key.to_vec(),
            field: None,
            previous: CellValue::Null,
            current: CellValue::Null,
            transition,
        });
        return;
    }
    for column in monitored {
        let (previous, current) = split(cell(row, column));
        records.push(DiffRecord {
            key: key.to_vec(),
            field: Some(column.clone()),
            previous,
            current,
            transition,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::storage::{IN_MEMORY_PATH, StorageBuilder, StorageHandles, WriteMode};
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    async fn store(table: &str, generations: Vec<Vec<Record>>) -> StorageHandles {
        let handles = StorageBuilder::new(IN_MEMORY_PATH).build().unwrap();
        for (minute, rows) in generations.into_iter().enumerate() {
            handles
                .writer
                .write(table, rows, ts(minute as u32), WriteMode::Append)
                .await
                .unwrap();
        }
        handles
    }

    #[tokio::test]
    async fn test_changed_status() {
        let handles = store(
            "pool_members",
            vec![
                vec![record! { "pool" => "P1", "member" => "10.0.0.1", "status" => "up" }],
                vec![record! { "pool" => "P1", "member" => "10.0.0.1", "status" => "down" }],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let records = engine.diff("pool_members", ["pool", "member"]).unwrap();
        assert_eq!(
            records,
            vec![DiffRecord {
                key: vec![CellValue::from("P1"), CellValue::from("10.0.0.1")],
                field: Some("status".to_string()),
                previous: CellValue::from("up"),
                current: CellValue::from("down"),
                transition: Transition::Changed,
            }]
        );
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_appeared_and_disappeared_with_values() {
        let handles = store(
            "vips",
            vec![
                vec![
                    record! { "vip" => "web", "state" => "available" },
                    record! { "vip" => "api", "state" => "available" },
                ],
                vec![
                    record! { "vip" => "web", "state" => "available" },
                    record! { "vip" => "mail", "state" => "offline" },
                ],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let report = engine.diff_with(&DiffRequest::new("vips", ["vip"])).unwrap();
        assert_eq!(report.previous, Some(ts(0)));
        assert_eq!(report.current, Some(ts(1)));
        assert_eq!(report.records.len(), 2);

        let api = &report.records[0];
        assert_eq!(api.key, vec![CellValue::from("api")]);
        assert_eq!(api.transition, Transition::Disappeared);
        assert_eq!(api.previous, CellValue::from("available"));
        assert_eq!(api.current, CellValue::Null);

        let mail = &report.records[1];
        assert_eq!(mail.transition, Transition::Appeared);
        assert_eq!(mail.current, CellValue::from("offline"));
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_key_only_table_reports_presence() {
        let handles = store(
            "ids",
            vec![
                vec![record! { "id" => "A" }],
                vec![record! { "id" => "A" }, record! { "id" => "B" }],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let records = engine.diff("ids", ["id"]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, vec![CellValue::from("B")]);
        assert_eq!(records[0].field, None);
        assert_eq!(records[0].transition, Transition::Appeared);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_row_order_and_null_normalization() {
        let handles = store(
            "ports",
            vec![
                vec![
                    record! { "port" => "Eth1/1", "vlan" => 10 },
                    record! { "port" => "Eth1/2", "vlan" => 20 },
                ],
                vec![
                    record! { "port" => "Eth1/2", "vlan" => 20, "desc" => None::<String> },
                    record! { "port" => "Eth1/1", "vlan" => 10, "desc" => None::<String> },
                ],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        assert!(engine.diff("ports", ["port"]).unwrap().is_empty());
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_monitored_columns_subset() {
        let handles = store(
            "interfaces",
            vec![
                vec![record! { "name" => "Eth1", "status" => "up", "counters" => 10 }],
                vec![record! { "name" => "Eth1", "status" => "up", "counters" => 99 }],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let request = DiffRequest::new("interfaces", ["name"]).with_columns(["status"]);
        assert!(engine.diff_with(&request).unwrap().is_empty());
        assert_eq!(engine.diff("interfaces", ["name"]).unwrap().len(), 1);

        let request = DiffRequest::new("interfaces", ["name"]).with_columns(["speed"]);
        assert!(matches!(
            engine.diff_with(&request),
            Err(DriftError::UnknownColumn { column, .. }) if column == "speed"
        ));
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_errors() {
        let handles = store(
            "arp",
            vec![
                vec![
                    record! { "ip" => "10.0.0.1", "mac" => "aa" },
                    record! { "ip" => "10.0.0.1", "mac" => "bb" },
                ],
                vec![record! { "ip" => "10.0.0.1", "mac" => "aa" }],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        assert!(matches!(
            engine.diff("arp", ["ip"]),
            Err(DriftError::DuplicateResourceKey { timestamp, .. }) if timestamp == ts(0)
        ));
        assert!(matches!(
            engine.diff("arp", Vec::<String>::new()),
            Err(DriftError::EmptyResourceKey { .. })
        ));
        assert!(matches!(
            engine.diff("missing", ["ip"]),
            Err(DriftError::Storage(StorageError::TableNotFound(_)))
        ));
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_single_generation_is_empty() {
        let handles = store("vlans", vec![vec![record! { "vlan" => 10, "name" => "users" }]]).await;
        let engine = DriftEngine::new(handles.reader.clone());

        let report = engine.diff_with(&DiffRequest::new("vlans", ["vlan"])).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.current, Some(ts(0)));
        assert_eq!(report.previous, None);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_repeated_monitored_column_reported_once() {
        let handles = store(
            "pool_members",
            vec![
                vec![record! { "member" => "10.0.0.1", "status" => "up", "ratio" => 1 }],
                vec![record! { "member" => "10.0.0.1", "status" => "down", "ratio" => 2 }],
            ],
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let request = DiffRequest::new("pool_members", ["member"])
            .with_columns(["status", "ratio", "status", "member"]);
        let fields: Vec<_> = engine
            .diff_with(&request)
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.field)
            .collect();
        assert_eq!(
            fields,
            vec![Some("ratio".to_string()), Some("status".to_string())]
        );
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_diff_uses_the_two_newest_of_many_generations() {
        let handles = store(
            "vlans",
            (0..5)
                .map(|i| vec![record! { "vlan" => 10, "name" => format!("users-{i}") }])
                .collect(),
        )
        .await;
        let engine = DriftEngine::new(handles.reader.clone());

        let report = engine.diff_with(&DiffRequest::new("vlans", ["vlan"])).unwrap();
        assert_eq!(report.previous, Some(ts(3)));
        assert_eq!(report.current, Some(ts(4)));
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].previous, CellValue::from("users-3"));
        assert_eq!(report.records[0].current, CellValue::from("users-4"));
        handles.shutdown().unwrap();
    }
}
