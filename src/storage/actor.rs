//! Writer actor with dedicated connection and MPSC channel.
//!
//! Single-writer pattern: one thread owns the write connection and applies
//! every mutation of the snapshot store. Each write is one DuckDB transaction,
//! so readers either see a whole generation or none of it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use duckdb::types::Value;
use duckdb::{Connection, params, params_from_iter};
use tokio::sync::oneshot;

use crate::storage::StorageError;
use crate::storage::schema::{
    TIMESTAMP_COLUMN, catalog_entry, collect_columns, init_schema, latest_timestamp,
    normalize_table_name, quote_ident, table_columns,
};
use crate::storage::types::{WriteMode, WriteRequest, WriteSummary, micros_to_datetime};

// =============================================================================
// Constants
// =============================================================================

/// Path that selects an in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Commands
// =============================================================================

/// Reply channel for commands that report a result.
pub type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Write one generation.
    Write {
        request: WriteRequest,
        reply: Reply<WriteSummary>,
    },
    /// Delete all but the newest `keep` generations of a table.
    Prune {
        table: String,
        keep: usize,
        reply: Reply<usize>,
    },
    /// Liveness probe; answered once every earlier command is applied.
    Ping { reply: Reply<()> },
    /// Force WAL checkpoint.
    Checkpoint,
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Actor
// =============================================================================

/// Database writer actor.
pub struct DbActor {
    conn: Connection,
    rx: Receiver<Command>,
    last_checkpoint: Instant,
    checkpoint_interval: Duration,
}

impl DbActor {
    /// Spawn the writer actor thread.
    ///
    /// Returns a tuple of:
    /// - `JoinHandle<()>`: Handle to the actor thread
    /// - `SyncSender<Command>`: Channel sender for commands
    /// - `Connection`: A cloneable connection for creating reader connections via `try_clone()`
    pub fn spawn(
        db_path: &Path,
        channel_capacity: usize,
        checkpoint_interval: Duration,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>, Connection), StorageError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let conn = if db_path.as_os_str() == IN_MEMORY_PATH {
            Connection::open_in_memory()?
        } else {
            Connection::open(db_path)?
        };
        init_schema(&conn)?;

        // Connections from try_clone() share the database instance, so readers
        // see committed generations without waiting for a checkpoint.
        let reader_conn = conn.try_clone()?;

        let mut actor = DbActor {
            conn,
            rx,
            last_checkpoint: Instant::now(),
            checkpoint_interval,
        };
        let handle = thread::Builder::new()
            .name("netdrift-writer".to_string())
            .spawn(move || actor.run())
            .map_err(|e| StorageError::Internal(format!("failed to spawn writer thread: {e}")))?;

        Ok((handle, tx, reader_conn))
    }

    fn run(&mut self) {
        tracing::info!("DbActor started");

        loop {
            let deadline = self.last_checkpoint + self.checkpoint_interval;
            let timeout = deadline.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Channel disconnected, shutting down");
                    let _ = self.checkpoint();
                    break;
                }
            }

            if self.last_checkpoint.elapsed() >= self.checkpoint_interval {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Periodic checkpoint failed");
                }
                self.last_checkpoint = Instant::now();
            }
        }

        tracing::info!("DbActor stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Write { request, reply } => {
                let table = request.table.clone();
                let result = self.write_generation(request);
                if let Err(e) = &result {
                    tracing::warn!(table = %table, error = %e, "Write rolled back");
                }
                let _ = reply.send(result);
            }
            Command::Prune { table, keep, reply } => {
                let _ = reply.send(self.prune(&table, keep));
            }
            Command::Ping { reply } => {
                let result = self
                    .conn
                    .execute_batch("SELECT 1;")
                    .map_err(StorageError::from);
                let _ = reply.send(result);
            }
            Command::Checkpoint => {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Checkpoint failed");
                }
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                let _ = self.checkpoint();
                return true;
            }
        }
        false
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Apply one write as a single transaction.
    ///
    /// Any early return drops the transaction, which rolls it back.
    fn write_generation(&mut self, request: WriteRequest) -> Result<WriteSummary, StorageError> {
        let table = normalize_table_name(&request.table)?;
        let columns = collect_columns(&table, &request.rows)?;
        let ts = request.timestamp.timestamp_micros();
        let now = Utc::now().timestamp_micros();

        let tx = self.conn.transaction()?;
        let existing = catalog_entry(&tx, &table)?;

        let mut created = false;
        let mut added_columns = Vec::new();
        match (existing, request.mode) {
            (None, _) => {
                create_table(&tx, &table, &columns)?;
                created = true;
            }
            (Some(_), WriteMode::FailIfExists) => {
                return Err(StorageError::TableExists(table));
            }
            (Some(_), WriteMode::Replace) => {
                tx.execute_batch(&format!("DROP TABLE {};", quote_ident(&table)))?;
                create_table(&tx, &table, &columns)?;
                created = true;
            }
            (Some(_), WriteMode::Append) => {
                if let Some(latest) = latest_timestamp(&tx, &table)?
                    && ts < latest
                {
                    return Err(StorageError::StaleTimestamp {
                        table,
                        timestamp: request.timestamp,
                        latest: micros_to_datetime(latest),
                    });
                }

                let known: HashSet<String> = table_columns(&tx, &table)?
                    .into_iter()
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                for column in &columns {
                    if known.contains(&column.to_ascii_lowercase()) {
                        continue;
                    }
                    tx.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {} VARCHAR;",
                        quote_ident(&table),
                        quote_ident(column)
                    ))?;
                    added_columns.push(column.clone());
                }
                if !added_columns.is_empty() {
                    tracing::info!(table = %table, columns = ?added_columns, "Schema widened");
                }
            }
        }

        {
            let column_list = std::iter::once(TIMESTAMP_COLUMN)
                .chain(columns.iter().map(String::as_str))
                .map(quote_ident)
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; columns.len() + 1].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
                quote_ident(&table)
            ))?;

            for row in &request.rows {
                let values = std::iter::once(Value::BigInt(ts)).chain(columns.iter().map(|c| {
                    row.get(c)
                        .and_then(|cell| cell.encode())
                        .map_or(Value::Null, Value::Text)
                }));
                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.execute(
            "INSERT INTO snapshot_catalog (table_name, write_mode, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (table_name) DO UPDATE SET
                 write_mode = EXCLUDED.write_mode,
                 updated_at = EXCLUDED.updated_at",
            params![table, request.mode.as_ref(), now, now],
        )?;
        tx.commit()?;

        tracing::debug!(
            table = %table,
            rows = request.rows.len(),
            mode = %request.mode,
            created,
            "Generation written"
        );

        Ok(WriteSummary {
            table,
            timestamp: request.timestamp,
            rows: request.rows.len(),
            created,
            added_columns,
        })
    }

    // =========================================================================
    // Maintenance Operations
    // =========================================================================

    fn prune(&mut self, table: &str, keep: usize) -> Result<usize, StorageError> {
        let table = normalize_table_name(table)?;
        let tx = self.conn.transaction()?;
        if catalog_entry(&tx, &table)?.is_none() {
            return Err(StorageError::TableNotFound(table));
        }

        let ts = quote_ident(TIMESTAMP_COLUMN);
        let quoted = quote_ident(&table);
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {quoted} WHERE {ts} NOT IN (
                     SELECT DISTINCT {ts} FROM {quoted} ORDER BY {ts} DESC LIMIT {keep}
                 )"
            ),
            [],
        )?;
        tx.commit()?;

        tracing::info!(table = %table, keep, deleted, "Generations pruned");
        Ok(deleted)
    }

    fn checkpoint(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("CHECKPOINT;")?;
        tracing::debug!("WAL checkpoint completed");
        Ok(())
    }
}

/// Create a snapshot table: the timestamp column plus one VARCHAR per column.
fn create_table(conn: &Connection, table: &str, columns: &[String]) -> Result<(), StorageError> {
    let definitions = std::iter::once(format!("{} BIGINT NOT NULL", quote_ident(TIMESTAMP_COLUMN)))
        .chain(columns.iter().map(|c| format!("{} VARCHAR", quote_ident(c))))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "CREATE TABLE {} ({definitions});",
        quote_ident(table)
    ))?;
    tracing::debug!(table, columns = columns.len(), "Snapshot table created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::storage::types::Record;
    use chrono::{DateTime, TimeZone};
    use tempfile::tempdir;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn write(
        tx: &SyncSender<Command>,
        table: &str,
        rows: Vec<Record>,
        timestamp: DateTime<Utc>,
        mode: WriteMode,
    ) -> Result<WriteSummary, StorageError> {
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Write {
            request: WriteRequest {
                table: table.to_string(),
                rows,
                timestamp,
                mode,
            },
            reply,
        })
        .unwrap();
        rx.blocking_recv().unwrap()
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_actor_lifecycle() {
        let dir = tempdir().unwrap();
        let (handle, tx, _reader_conn) =
            DbActor::spawn(&dir.path().join("test.db"), 100, Duration::from_secs(1)).unwrap();
        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_ping_and_in_memory() {
        let (handle, tx, _reader_conn) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 10, Duration::from_secs(1)).unwrap();
        let (reply, rx) = oneshot::channel();
        tx.send(Command::Ping { reply }).unwrap();
        assert!(rx.blocking_recv().unwrap().is_ok());
        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_append_creates_and_widens() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("append.db");
        let (handle, tx, reader) =
            DbActor::spawn(&db_path, 100, Duration::from_secs(1)).unwrap();

        let first = write(
            &tx,
            "Pool_Members",
            vec![record! { "pool" => "P1", "status" => "up" }],
            ts(0),
            WriteMode::Append,
        )
        .unwrap();
        assert_eq!(first.table, "pool_members");
        assert!(first.created);

        let second = write(
            &tx,
            "pool_members",
            vec![record! { "pool" => "P1", "status" => "up", "ratio" => 2 }],
            ts(5),
            WriteMode::Append,
        )
        .unwrap();
        assert!(!second.created);
        assert_eq!(second.added_columns, vec!["ratio"]);

        assert_eq!(
            table_columns(&reader, "pool_members").unwrap(),
            vec!["pool", "status", "ratio"]
        );
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM pool_members"), 2);
        assert_eq!(
            count(&reader, "SELECT COUNT(*) FROM pool_members WHERE ratio IS NULL"),
            1
        );

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_replace_discards_prior_generations() {
        let (handle, tx, reader) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 100, Duration::from_secs(1)).unwrap();

        write(
            &tx,
            "vlans",
            vec![record! { "vlan" => 10, "name" => "users" }, record! { "vlan" => 20, "name" => "voice" }],
            ts(0),
            WriteMode::Replace,
        )
        .unwrap();
        let summary = write(
            &tx,
            "vlans",
            vec![record! { "vlan" => 30 }],
            ts(1),
            WriteMode::Replace,
        )
        .unwrap();
        assert!(summary.created);

        assert_eq!(count(&reader, "SELECT COUNT(*) FROM vlans"), 1);
        assert_eq!(table_columns(&reader, "vlans").unwrap(), vec!["vlan"]);
        let entry = catalog_entry(&reader, "vlans").unwrap().unwrap();
        assert_eq!(entry.write_mode, WriteMode::Replace);

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_fail_if_exists() {
        let (handle, tx, _reader) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 100, Duration::from_secs(1)).unwrap();

        let rows = vec![record! { "serial" => "FDO1234" }];
        write(&tx, "inventory", rows.clone(), ts(0), WriteMode::FailIfExists).unwrap();
        let err = write(&tx, "inventory", rows, ts(1), WriteMode::FailIfExists).unwrap_err();
        assert!(matches!(err, StorageError::TableExists(t) if t == "inventory"));

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_stale_timestamp_rejected_and_equal_merges() {
        let (handle, tx, reader) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 100, Duration::from_secs(1)).unwrap();

        write(&tx, "arp", vec![record! { "ip" => "10.0.0.1" }], ts(10), WriteMode::Append).unwrap();
        write(&tx, "arp", vec![record! { "ip" => "10.0.0.2" }], ts(10), WriteMode::Append).unwrap();
        let err =
            write(&tx, "arp", vec![record! { "ip" => "10.0.0.3" }], ts(5), WriteMode::Append)
                .unwrap_err();
        assert!(matches!(err, StorageError::StaleTimestamp { .. }));

        assert_eq!(
            count(&reader, "SELECT COUNT(DISTINCT \"timestamp\") FROM arp"),
            1
        );
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM arp"), 2);

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let (handle, tx, reader) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 100, Duration::from_secs(1)).unwrap();

        let err = write(
            &tx,
            "routes",
            vec![record! { "prefix" => "10.0.0.0/8" }, record! { "next_hop" => "10.0.0.1" }],
            ts(0),
            WriteMode::Append,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InconsistentColumns { row: 1, .. }));
        assert!(catalog_entry(&reader, "routes").unwrap().is_none());

        let err = write(&tx, "routes", Vec::new(), ts(0), WriteMode::Append).unwrap_err();
        assert!(matches!(err, StorageError::EmptyGeneration(_)));

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_prune_keeps_newest_generations() {
        let (handle, tx, reader) =
            DbActor::spawn(Path::new(IN_MEMORY_PATH), 100, Duration::from_secs(1)).unwrap();

        for minute in 0..4 {
            write(
                &tx,
                "bgp_peers",
                vec![record! { "peer" => "192.0.2.1", "state" => "established" }],
                ts(minute),
                WriteMode::Append,
            )
            .unwrap();
        }

        let (reply, rx) = oneshot::channel();
        tx.send(Command::Prune {
            table: "bgp_peers".to_string(),
            keep: 1,
            reply,
        })
        .unwrap();
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), 3);
        assert_eq!(count(&reader, "SELECT COUNT(*) FROM bgp_peers"), 1);

        let (reply, rx) = oneshot::channel();
        tx.send(Command::Prune {
            table: "missing".to_string(),
            keep: 1,
            reply,
        })
        .unwrap();
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            Err(StorageError::TableNotFound(_))
        ));

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
