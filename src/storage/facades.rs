//! User-facing storage facades.
//!
//! - `SnapshotWriter`: Atomic generation writes via the writer actor
//! - `SnapshotReader`: Generations, schemas and catalog listings
//! - `StorageAdmin`: Pruning and maintenance

use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError};

use chrono::{DateTime, Utc};
use duckdb::Connection;
use tokio::sync::oneshot;

use crate::storage::StorageError;
use crate::storage::actor::{Command, Reply};
use crate::storage::pool::ReadPool;
use crate::storage::schema::{
    TIMESTAMP_COLUMN, catalog_entry, normalize_table_name, quote_ident, table_columns,
};
use crate::storage::types::{
    CellValue, Generation, GenerationInfo, Record, TableInfo, TableSnapshot, WriteMode,
    WriteRequest, WriteSummary, micros_to_datetime,
};

// =============================================================================
// Helpers
// =============================================================================

fn send(tx: &SyncSender<Command>, cmd: Command) -> Result<(), StorageError> {
    tx.try_send(cmd).map_err(|e| {
        if matches!(e, TrySendError::Full(_)) {
            tracing::warn!("Writer channel full, rejecting command");
        }
        StorageError::ChannelSend
    })
}

/// Enqueue a command, waiting for room when the channel is full.
async fn send_wait(tx: &SyncSender<Command>, cmd: Command) -> Result<(), StorageError> {
    let cmd = match tx.try_send(cmd) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Disconnected(_)) => return Err(StorageError::ChannelSend),
        Err(TrySendError::Full(cmd)) => cmd,
    };

    tracing::debug!("Writer channel full, waiting for room");
    let tx = tx.clone();
    tokio::task::spawn_blocking(move || tx.send(cmd))
        .await
        .map_err(|e| StorageError::Internal(format!("send task failed: {e}")))?
        .map_err(|_| StorageError::ChannelSend)
}

async fn call<T>(
    tx: &SyncSender<Command>,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, StorageError> {
    let (reply, rx) = oneshot::channel();
    send_wait(tx, build(reply)).await?;
    rx.await.map_err(|_| StorageError::ChannelClosed)?
}

/// Normalize the name and make sure the table was written at least once.
fn existing_table(conn: &Connection, table: &str) -> Result<String, StorageError> {
    let table = normalize_table_name(table)?;
    if catalog_entry(conn, &table)?.is_none() {
        return Err(StorageError::TableNotFound(table));
    }
    Ok(table)
}

fn snapshot_in(conn: &Connection, table: &str, n: usize) -> Result<TableSnapshot, StorageError> {
    let table = existing_table(conn, table)?;
    let columns = table_columns(conn, &table)?;
    let mut snapshot = TableSnapshot {
        columns,
        generations: Vec::new(),
    };
    if n == 0 {
        return Ok(snapshot);
    }

    let ts = quote_ident(TIMESTAMP_COLUMN);
    let quoted = quote_ident(&table);
    let select_list = std::iter::once(ts.clone())
        .chain(snapshot.columns.iter().map(|c| quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {select_list} FROM {quoted}
         WHERE {ts} IN (SELECT DISTINCT {ts} FROM {quoted} ORDER BY {ts} DESC LIMIT {n})
         ORDER BY {ts} DESC, rowid"
    ))?;
    let mut rows = stmt.query([])?;

    let mut current: Option<i64> = None;
    while let Some(row) = rows.next()? {
        let micros: i64 = row.get(0)?;
        let mut record = Record::new();
        for (idx, column) in snapshot.columns.iter().enumerate() {
            let raw: Option<String> = row.get(idx + 1)?;
            record.insert(column.clone(), CellValue::decode(raw));
        }

        if current != Some(micros) {
            current = Some(micros);
            snapshot.generations.push(Generation {
                timestamp: micros_to_datetime(micros),
                rows: Vec::new(),
            });
        }
        if let Some(generation) = snapshot.generations.last_mut() {
            generation.rows.push(record);
        }
    }

    Ok(snapshot)
}

// =============================================================================
// Writer
// =============================================================================

/// Snapshot writer.
///
/// Every call resolves only after the writer actor committed (or rolled back)
/// the whole generation.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter").finish_non_exhaustive()
    }
}

impl SnapshotWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Write `rows` as one generation of `table` stamped with `timestamp`.
    pub async fn write(
        &self,
        table: &str,
        rows: Vec<Record>,
        timestamp: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<WriteSummary, StorageError> {
        let request = WriteRequest {
            table: table.to_string(),
            rows,
            timestamp,
            mode,
        };
        self.write_request(request).await
    }

    /// Write a prepared [`WriteRequest`].
    pub async fn write_request(&self, request: WriteRequest) -> Result<WriteSummary, StorageError> {
        call(&self.tx, |reply| Command::Write { request, reply }).await
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Snapshot reader.
#[derive(Clone)]
pub struct SnapshotReader {
    pool: Arc<ReadPool>,
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader").finish_non_exhaustive()
    }
}

impl SnapshotReader {
    pub(crate) fn new(pool: Arc<ReadPool>) -> Self {
        Self { pool }
    }

    /// Rows of the `n` most recent generations, newest first.
    ///
    /// Returns fewer than `n` generations when history is short.
    pub fn read_latest_generations(
        &self,
        table: &str,
        n: usize,
    ) -> Result<Vec<Generation>, StorageError> {
        Ok(self.read_snapshot(table, n)?.generations)
    }

    /// Columns and the `n` most recent generations of a table.
    ///
    /// Every query runs in one read transaction, so a concurrent write is
    /// either fully visible or not at all.
    pub fn read_snapshot(&self, table: &str, n: usize) -> Result<TableSnapshot, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let snapshot = snapshot_in(&tx, table, n)?;
        tx.commit()?;
        Ok(snapshot)
    }

    /// Ordered column names of a table, excluding the timestamp column.
    pub fn read_schema(&self, table: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.pool.get()?;
        let table = existing_table(&conn, table)?;
        table_columns(&conn, &table)
    }

    /// All snapshot tables, sorted by name.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT table_name FROM snapshot_catalog ORDER BY table_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        names
            .iter()
            .filter_map(|name| catalog_entry(&conn, name).transpose())
            .collect()
    }

    /// Generation timestamps and row counts, newest first.
    pub fn list_generations(&self, table: &str) -> Result<Vec<GenerationInfo>, StorageError> {
        let conn = self.pool.get()?;
        let table = existing_table(&conn, table)?;
        let ts = quote_ident(TIMESTAMP_COLUMN);
        let mut stmt = conn.prepare(&format!(
            "SELECT {ts}, COUNT(*) FROM {} GROUP BY {ts} ORDER BY {ts} DESC",
            quote_ident(&table)
        ))?;
        let infos = stmt
            .query_map([], |row| {
                Ok(GenerationInfo {
                    timestamp: micros_to_datetime(row.get(0)?),
                    rows: usize::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(infos)
    }

    /// Whether the table was ever written.
    pub fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let conn = self.pool.get()?;
        let table = normalize_table_name(table)?;
        Ok(catalog_entry(&conn, &table)?.is_some())
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Storage administration.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Delete all but the newest `keep` generations. Returns deleted rows.
    pub async fn prune(&self, table: &str, keep: usize) -> Result<usize, StorageError> {
        let table = table.to_string();
        call(&self.tx, |reply| Command::Prune { table, keep, reply }).await
    }

    /// Round-trip through the writer actor.
    pub async fn ping(&self) -> Result<(), StorageError> {
        call(&self.tx, |reply| Command::Ping { reply }).await
    }

    pub fn checkpoint(&self) -> Result<(), StorageError> {
        send(&self.tx, Command::Checkpoint)
    }

    /// Ask the writer actor to stop after the commands already queued.
    ///
    /// Blocks while the channel is full.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| StorageError::ChannelSend)
    }
}
