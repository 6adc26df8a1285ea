//! Relational store capabilities.
//!
//! The pipeline only talks to a store through three small traits:
//!
//! - [`Connector`] opens connections (with a per-attempt timeout)
//! - [`BulkWriter`] writes one column-major batch and reports rows affected or a store failure
//! - [`StoreConnection`] adds a health probe and the per-tag count used for verification
//!
//! Statement shape and parameter binding are backend-specific and live in the backends:
//! [`sqlite`] (feature `sqlite`) and [`memory`].

mod manager;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::time::Duration;

use crate::columnar::ColumnBatch;
use crate::error::StoreError;
use crate::types::{BatchTag, TargetTable};

pub use manager::{ConnectionHandle, ConnectionManager, PoolStats, RetryPolicy};

/// Writes a column-major batch as a single bulk operation.
///
/// The store either accepts every row of `batch` or rejects it whole.
pub trait BulkWriter {
    fn write_columns(
        &mut self,
        table: &TargetTable,
        batch: &ColumnBatch,
        timeout: Duration,
    ) -> Result<u64, StoreError>;
}

/// An open store connection.
pub trait StoreConnection: BulkWriter + Send {
    /// Lightweight round trip proving the connection is usable.
    fn ping(&mut self) -> Result<(), StoreError>;

    /// Number of rows in `table` carrying `tag`.
    fn count_by_batch_tag(&mut self, table: &TargetTable, tag: &BatchTag) -> Result<u64, StoreError>;
}

/// Opens [`StoreConnection`]s.
pub trait Connector: Send + Sync {
    type Connection: StoreConnection;

    fn connect(&self, timeout: Duration) -> Result<Self::Connection, StoreError>;
}
