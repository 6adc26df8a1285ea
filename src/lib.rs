//! `claims-loader` streams delimited pharmacy claim alert extracts into a relational table.
//!
//! A run reads the source one record at a time, maps whatever header spellings the extract uses
//! onto a fixed set of canonical fields, validates every row, groups valid records into bounded
//! batches and writes each batch as a single column-major bulk statement. Memory use is bounded
//! by the batch size (times the configured concurrency), not by the size of the source.
//!
//! The primary entrypoint is [`coordinator::LoadCoordinator`].
//!
//! ## Failure policy
//!
//! Failures are handled at three levels, and a run always returns an
//! [`report::IngestionReport`]:
//!
//! - **Row**: a row that fails validation is skipped and listed in the report with its line
//!   number, raw text and every reason it was rejected. The run continues.
//! - **Batch**: a batch the store rejects is lost as a whole (no partial retry) and listed with
//!   the store's own error text. The run continues with the next batch.
//! - **Run**: invalid options, an unreachable store (after retries) or a header that does not fit
//!   the target table abort the run before any batch is written.
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use claims_loader::config::LoadOptions;
//! use claims_loader::coordinator::LoadCoordinator;
//! use claims_loader::observability::NoopObserver;
//! use claims_loader::store::memory::MemoryStore;
//! use claims_loader::types::TargetTable;
//!
//! let input = "Member ID,Quarter,Year,Paid Amount\n\
//!              M001,Q1,2024,12.50\n\
//!              M002,Q5,2024,3.00\n\
//!              M003,Q1,2024,7.25\n";
//!
//! let store = MemoryStore::new();
//! let options = LoadOptions {
//!     batch_size: 2,
//!     ..LoadOptions::default()
//! };
//! let loader = LoadCoordinator::new(
//!     store.connector(),
//!     options,
//!     TargetTable::claim_alerts(),
//!     Arc::new(NoopObserver),
//! );
//!
//! let report = loader.run(input.as_bytes());
//! assert_eq!(report.total_read, 3);
//! assert_eq!(report.rejected, 1);
//! assert_eq!(report.errors[0].line, 2);
//! assert_eq!(report.errors[0].reasons[0].to_string(), "invalid quarter");
//! assert_eq!(report.rows_inserted, 2);
//! ```
//!
//! With the `sqlite` feature (on by default) the same run targets a database file through
//! [`store::sqlite::SqliteConnector`].
//!
//! ## Modules
//!
//! - [`coordinator`]: run state machine, sequential and bounded-parallel dispatch, verification
//! - [`schema`]: header alias table and [`schema::SchemaMapper`]
//! - [`validation`]: [`validation::RecordValidator`] and rejection reasons
//! - [`source`]: streaming delimited reader with encoding support
//! - [`batching`]: [`batching::Batcher`]
//! - [`columnar`]: row-major to column-major transposition
//! - [`writer`]: [`writer::ColumnarBulkWriter`]
//! - [`store`]: store capabilities, [`store::ConnectionManager`], SQLite and in-memory backends
//! - [`report`]: [`report::IngestionReport`]
//! - [`observability`]: the [`observability::LoadObserver`] logging collaborator
//! - [`config`]: [`config::LoadOptions`]
//! - [`execution`]: worker pool used for concurrent batch writes
//! - [`types`]: canonical fields, records, batches and the target-table descriptor
//! - [`error`]: error types used across the crate

pub mod batching;
pub mod columnar;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod observability;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;
pub mod validation;
pub mod writer;

pub use error::{LoadError, LoadResult, StoreError, StoreErrorKind};
