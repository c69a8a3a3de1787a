//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the snapshot store
//! and a handles struct for accessing all storage facades.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::storage::StorageError;
use crate::storage::actor::{DbActor, IN_MEMORY_PATH};
use crate::storage::pool::ReadPool;
use crate::storage::{SnapshotReader, SnapshotWriter, StorageAdmin};

/// Default channel capacity for writer commands.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default WAL checkpoint interval.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_path: PathBuf,
    channel_capacity: usize,
    checkpoint_interval: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder. `":memory:"` opens an in-memory database.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the WAL checkpoint interval.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Build the storage layer and return handles.
    pub fn build(self) -> Result<StorageHandles, StorageError> {
        let in_memory = self.db_path.as_os_str() == IN_MEMORY_PATH;

        // Create parent directory if it doesn't exist
        if !in_memory
            && let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let (actor_handle, tx, reader_conn) = DbActor::spawn(
            &self.db_path,
            self.channel_capacity,
            self.checkpoint_interval,
        )?;
        let pool = ReadPool::new(reader_conn);

        tracing::info!(path = %self.db_path.display(), "Snapshot store opened");

        Ok(StorageHandles {
            writer: SnapshotWriter::new(tx.clone()),
            reader: SnapshotReader::new(pool),
            admin: StorageAdmin::new(tx),
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Generation writer.
    pub writer: SnapshotWriter,
    /// Generation and catalog reader.
    pub reader: SnapshotReader,
    /// Facade for storage administration.
    pub admin: StorageAdmin,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends shutdown command to the writer actor and waits for it to finish.
    pub fn shutdown(mut self) -> Result<(), StorageError> {
        self.admin.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| StorageError::Internal("Failed to join actor thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for StorageHandles {
    fn drop(&mut self) {
        if self.actor_handle.is_some() {
            let _ = self.admin.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}
