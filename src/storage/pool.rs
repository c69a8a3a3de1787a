//! Reader connections cloned from the writer's database instance.

use std::sync::{Arc, Mutex};

use duckdb::Connection;

use crate::storage::StorageError;

/// Source of connections for concurrent read operations.
///
/// Every `get()` hands out a fresh connection to the same database instance
/// as the writer actor, so committed generations are visible immediately.
pub struct ReadPool {
    conn: Mutex<Connection>,
}

impl ReadPool {
    /// Create a new read pool from a connection cloned off the writer.
    pub fn new(conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get a connection for one read.
    pub fn get(&self) -> Result<Connection, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Internal("read pool lock poisoned".to_string()))?;
        Ok(conn.try_clone()?)
    }
}
