//! Columnar bulk writer.
//!
//! [`ColumnarBulkWriter`] turns one [`Batch`] into a [`ColumnBatch`] and submits it through a
//! [`BulkWriter`] as a single statement. A batch is accepted whole or rejected whole; a rejected
//! batch becomes a [`BatchFailure`] carrying the store's own error text and is never retried at
//! a finer granularity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::columnar::ColumnBatch;
use crate::error::StoreError;
use crate::observability::{self, LoadEvent, LoadObserver, Severity};
use crate::store::BulkWriter;
use crate::types::{Batch, BatchTag, RecordStatus, TargetTable};

/// A batch the store did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub tag: BatchTag,
    pub rows: usize,
    pub error: StoreError,
}

/// Writes batches into one [`TargetTable`].
pub struct ColumnarBulkWriter {
    table: TargetTable,
    command_timeout: Duration,
    observer: Arc<dyn LoadObserver>,
    alert_at_or_above: Severity,
}

impl std::fmt::Debug for ColumnarBulkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnarBulkWriter")
            .field("table", &self.table.name)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl ColumnarBulkWriter {
    pub fn new(table: TargetTable, command_timeout: Duration, observer: Arc<dyn LoadObserver>) -> Self {
        Self {
            table,
            command_timeout,
            observer,
            alert_at_or_above: Severity::Critical,
        }
    }

    pub fn with_alert_threshold(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    /// Write `batch` through `conn`, returning the rows the store reports inserted.
    ///
    /// Records leave this call `Processed` on success or `Error` (with the store message) on
    /// failure.
    pub fn write<W>(&self, batch: &mut Batch, conn: &mut W) -> Result<u64, BatchFailure>
    where
        W: BulkWriter + ?Sized,
    {
        let start = Instant::now();
        for record in &mut batch.records {
            record.status = RecordStatus::Processed;
        }
        let columns = ColumnBatch::transpose(batch, &self.table);

        match conn.write_columns(&self.table, &columns, self.command_timeout) {
            Ok(rows) => {
                self.emit(LoadEvent::BatchWritten {
                    index: batch.index,
                    tag: batch.tag.clone(),
                    rows,
                    elapsed: start.elapsed(),
                });
                Ok(rows)
            }
            Err(error) => Err(self.fail(batch, error)),
        }
    }

    /// Record that `batch` could not be written because of `error`.
    pub fn fail(&self, batch: &mut Batch, error: StoreError) -> BatchFailure {
        let message = error.to_string();
        for record in &mut batch.records {
            record.status = RecordStatus::Error;
            record.error_message = Some(message.clone());
        }
        self.emit(LoadEvent::BatchFailed {
            index: batch.index,
            tag: batch.tag.clone(),
            rows: batch.len(),
            error: error.clone(),
        });
        BatchFailure {
            index: batch.index,
            tag: batch.tag.clone(),
            rows: batch.len(),
            error,
        }
    }

    fn emit(&self, event: LoadEvent) {
        observability::emit(self.observer.as_ref(), self.alert_at_or_above, event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::StoreErrorKind;
    use crate::observability::NoopObserver;
    use crate::store::memory::MemoryStore;
    use crate::store::Connector;
    use crate::types::{Period, Quarter, Record};

    fn batch(index: usize, n: usize) -> Batch {
        let tag = BatchTag::new("RUN");
        let records = (0..n)
            .map(|i| {
                let mut r = Record::new(
                    format!("M{i}"),
                    Period {
                        quarter: Quarter::Q1,
                        year: 2023,
                    },
                );
                r.status = RecordStatus::Validated;
                r.batch_tag = Some(tag.clone());
                r
            })
            .collect();
        Batch { index, tag, records }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl LoadObserver for Events {
        fn on_event(&self, event: &LoadEvent) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    #[test]
    fn successful_write_marks_records_processed() {
        let store = MemoryStore::new();
        let mut conn = store.connector().connect(Duration::from_secs(1)).unwrap();
        let events = Arc::new(Events::default());
        let writer = ColumnarBulkWriter::new(TargetTable::claim_alerts(), Duration::from_secs(5), events.clone());

        let mut b = batch(0, 4);
        assert_eq!(writer.write(&mut b, &mut conn).unwrap(), 4);
        assert!(b.records.iter().all(|r| r.status == RecordStatus::Processed));
        assert_eq!(store.column("rx_claim_alerts", "status")[0].as_deref(), Some("PROCESSED"));
        let logged = events.0.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].starts_with("batch 0 tag=RUN rows=4 written"), "{}", logged[0]);
    }

    #[test]
    fn rejected_batch_becomes_failure_with_store_detail() {
        let store = MemoryStore::new();
        store.reject_batch(1);
        let mut conn = store.connector().connect(Duration::from_secs(1)).unwrap();
        let writer = ColumnarBulkWriter::new(TargetTable::claim_alerts(), Duration::from_secs(5), Arc::new(NoopObserver));

        let mut b = batch(1, 3);
        let failure = writer.write(&mut b, &mut conn).unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.rows, 3);
        assert_eq!(failure.error.kind, StoreErrorKind::Rejected);
        assert!(failure.error.message.contains("constraint"));
        assert!(b.records.iter().all(|r| r.status == RecordStatus::Error && r.error_message.is_some()));
        assert_eq!(store.row_count("rx_claim_alerts"), 0);
    }

    #[test]
    fn write_timeout_is_a_batch_failure() {
        let store = MemoryStore::new();
        store.set_write_delay(Duration::from_millis(40));
        let mut conn = store.connector().connect(Duration::from_secs(1)).unwrap();
        let writer = ColumnarBulkWriter::new(
            TargetTable::claim_alerts(),
            Duration::from_millis(5),
            Arc::new(NoopObserver),
        );

        let failure = writer.write(&mut batch(0, 2), &mut conn).unwrap_err();
        assert_eq!(failure.error.kind, StoreErrorKind::Timeout);
    }
}
