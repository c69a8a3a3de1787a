//! Snapshot Store
//!
//! Embedded DuckDB storage with read/write separation:
//! - **Writer**: Dedicated thread applying each generation as one transaction
//! - **Reader**: Connections cloned from the writer's database instance
//!
//! # Components
//!
//! - [`SnapshotWriter`]: Atomic generation writes (append, replace, fail-if-exists)
//! - [`SnapshotReader`]: Latest generations, schemas, tables and generation listings
//! - [`StorageAdmin`]: Pruning, checkpoints and liveness
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod facades;
mod pool;
mod schema;
mod types;

pub use actor::IN_MEMORY_PATH;
pub use builder::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL, StorageBuilder, StorageHandles,
};
pub use error::StorageError;
pub use facades::{SnapshotReader, SnapshotWriter, StorageAdmin};
pub use schema::{TIMESTAMP_COLUMN, normalize_table_name};
pub use types::{
    CellValue, Generation, GenerationInfo, Record, TableInfo, TableSnapshot, WriteMode,
    WriteRequest, WriteSummary,
};
