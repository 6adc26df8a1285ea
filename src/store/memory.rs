//! In-process store with scriptable failures.
//!
//! [`MemoryStore`] keeps rows as text per table and lets a caller script the failures a real
//! store produces: refused connections, rejected batches, slow writes, failing pings, and skewed
//! verification counts. Connections share state through the store handle, so a test keeps the
//! [`MemoryStore`] and hands [`MemoryStore::connector`] to the pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::columnar::ColumnBatch;
use crate::error::StoreError;
use crate::types::{BatchTag, TargetTable};

use super::{BulkWriter, Connector, StoreConnection};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default)]
struct State {
    tables: Mutex<HashMap<String, MemoryTable>>,
    connect_failures_left: AtomicU32,
    connect_attempts: AtomicU32,
    rejected_batches: Mutex<HashSet<usize>>,
    write_delay: Mutex<Duration>,
    write_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_pings: AtomicBool,
    fail_counts: AtomicBool,
    count_skew: AtomicI64,
}

/// Shared handle to an in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { store: self.clone() }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.connect_failures_left.store(n, Ordering::SeqCst);
    }

    /// Reject the batch with this index whenever it is written.
    pub fn reject_batch(&self, index: usize) {
        if let Ok(mut set) = self.state.rejected_batches.lock() {
            set.insert(index);
        }
    }

    /// Make every write take this long. Writes slower than their timeout fail with a timeout.
    pub fn set_write_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.state.write_delay.lock() {
            *d = delay;
        }
    }

    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn fail_counts(&self, fail: bool) {
        self.state.fail_counts.store(fail, Ordering::SeqCst);
    }

    /// Add `delta` to every per-tag count reported for verification.
    pub fn skew_counts(&self, delta: i64) {
        self.state.count_skew.store(delta, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.state.write_calls.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed running at the same time.
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.with_table(table, |t| t.rows.len()).unwrap_or(0)
    }

    /// All values stored in `column` of `table`, in insertion order.
    pub fn column(&self, table: &str, column: &str) -> Vec<Option<String>> {
        self.with_table(table, |t| {
            t.columns
                .iter()
                .position(|c| c == column)
                .map(|i| t.rows.iter().map(|r| r[i].clone()).collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    fn with_table<T>(&self, name: &str, f: impl FnOnce(&MemoryTable) -> T) -> Option<T> {
        let tables = self.state.tables.lock().ok()?;
        tables.get(name).map(f)
    }
}

/// Opens connections to a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn connect(&self, _timeout: Duration) -> Result<Self::Connection, StoreError> {
        let state = &self.store.state;
        state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = state
            .connect_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::unavailable("connection refused"));
        }
        Ok(MemoryConnection {
            store: self.store.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
}

/// Tracks the number of writes in progress.
struct InFlight<'a>(&'a State);

impl<'a> InFlight<'a> {
    fn enter(state: &'a State) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BulkWriter for MemoryConnection {
    fn write_columns(
        &mut self,
        table: &TargetTable,
        batch: &ColumnBatch,
        timeout: Duration,
    ) -> Result<u64, StoreError> {
        let state = &self.store.state;
        state.write_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(state);

        let delay = state.write_delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            std::thread::sleep(delay.min(timeout));
            if delay > timeout {
                return Err(StoreError::timeout(format!(
                    "write exceeded command timeout of {timeout:?}"
                )));
            }
        }

        let rejected = state
            .rejected_batches
            .lock()
            .map(|set| set.contains(&batch.index))
            .unwrap_or(false);
        if rejected {
            return Err(StoreError::rejected(format!(
                "batch {} violates a table constraint",
                batch.index
            )));
        }

        if batch.columns.len() != table.columns.len() {
            return Err(StoreError::rejected(format!(
                "expected {} columns, got {}",
                table.columns.len(),
                batch.columns.len()
            )));
        }
        if let Some(c) = batch.columns.iter().position(|c| c.len() != batch.row_count) {
            return Err(StoreError::rejected(format!(
                "column {} has {} values for {} rows",
                table.columns[c].name,
                batch.columns[c].len(),
                batch.row_count
            )));
        }
        for (spec, array) in table.columns.iter().zip(&batch.columns) {
            if !spec.nullable && (0..batch.row_count).any(|r| array.is_null(r)) {
                return Err(StoreError::rejected(format!(
                    "null value in column {} violates not-null constraint",
                    spec.name
                )));
            }
        }

        let mut tables = state
            .tables
            .lock()
            .map_err(|_| StoreError::unavailable("store state poisoned"))?;
        let stored = tables.entry(table.name.clone()).or_insert_with(|| MemoryTable {
            columns: table.column_names().map(str::to_string).collect(),
            rows: Vec::new(),
        });
        for row in 0..batch.row_count {
            stored
                .rows
                .push(batch.columns.iter().map(|c| c.text_at(row)).collect());
        }
        Ok(batch.row_count as u64)
    }
}

impl StoreConnection for MemoryConnection {
    fn ping(&mut self) -> Result<(), StoreError> {
        if self.store.state.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("ping failed"));
        }
        Ok(())
    }

    fn count_by_batch_tag(&mut self, table: &TargetTable, tag: &BatchTag) -> Result<u64, StoreError> {
        let state = &self.store.state;
        if state.fail_counts.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("count query failed"));
        }
        let Some(column) = table.batch_tag_column() else {
            return Err(StoreError::rejected(format!("{} has no batch tag column", table.name)));
        };
        let count = self
            .store
            .column(&table.name, &column.name)
            .iter()
            .filter(|v| v.as_deref() == Some(tag.as_str()))
            .count() as i64;
        let skewed = count + state.count_skew.load(Ordering::SeqCst);
        Ok(skewed.max(0) as u64)
    }
}
