//! Load coordinator.
//!
//! [`LoadCoordinator`] drives one source through the whole pipeline and owns the run's state
//! machine:
//!
//! ```text
//! Init ──► SchemaValidating ──► Streaming ──► Complete
//!   │             │                 ├────────► Cancelled
//!   └─────────────┴─────────────────┴────────► Aborted
//! ```
//!
//! - `Init` validates options and opens the first connection. Running out of connection retries
//!   aborts the run.
//! - `SchemaValidating` opens the source and resolves its header. A header that does not fit the
//!   target table aborts the run before any batch is attempted.
//! - `Streaming` validates rows, batches them and writes every batch. Rejected rows and failed
//!   batches are recorded in the report and never change state. A source that stops being
//!   readable mid-stream aborts the run once the batches already handed out have settled.
//! - `Complete` is reached when the source is exhausted, even if every batch failed.
//!
//! Fatal conditions never surface as `Err`: every run returns an [`IngestionReport`] whose
//! [`RunOutcome`] tells "aborted before completion" apart from "completed with failures".

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::batching::{Batcher, TagAssignment};
use crate::config::LoadOptions;
use crate::error::{LoadError, LoadResult, StoreError, StoreErrorKind};
use crate::execution::WorkerPool;
use crate::observability::{self, LoadEvent, LoadObserver};
use crate::report::{AbortReason, IngestionReport, LineError, ReportBuilder, RunOutcome};
use crate::schema::{AliasTable, ColumnMapping, SchemaMapper};
use crate::source::DelimitedSource;
use crate::store::{ConnectionManager, Connector, PoolStats, RetryPolicy, StoreConnection};
use crate::types::{Batch, BatchTag, TargetTable};
use crate::validation::{RecordValidator, RowOutcome};
use crate::writer::ColumnarBulkWriter;

/// States of one load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadState {
    Init,
    SchemaValidating,
    Streaming,
    Complete,
    Aborted,
    Cancelled,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted | Self::Cancelled)
    }
}

/// Shared cancellation request, honoured between batch dispatches.
///
/// A batch already handed to the store runs to completion (or to its own timeout). A run
/// consumes a pending request when it finishes, so the next run starts uncancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a pending request. Returns whether one was set.
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct StateTrack {
    current: LoadState,
    history: Vec<LoadState>,
}

/// Runs loads from delimited sources into one target table.
pub struct LoadCoordinator<C: Connector> {
    options: LoadOptions,
    connections: ConnectionManager<C>,
    writer: ColumnarBulkWriter,
    mapper: SchemaMapper,
    observer: Arc<dyn LoadObserver>,
    cancel: CancelFlag,
    state: Mutex<StateTrack>,
}

impl<C: Connector> std::fmt::Debug for LoadCoordinator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCoordinator")
            .field("options", &self.options)
            .field("writer", &self.writer)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Connector> LoadCoordinator<C> {
    pub fn new(connector: C, options: LoadOptions, table: TargetTable, observer: Arc<dyn LoadObserver>) -> Self {
        let threshold = options.alert_at_or_above;
        let connections = ConnectionManager::new(connector, RetryPolicy::from_options(&options), Arc::clone(&observer))
            .with_max_idle(options.max_concurrent_batches)
            .with_alert_threshold(threshold);
        let writer = ColumnarBulkWriter::new(table, options.command_timeout(), Arc::clone(&observer))
            .with_alert_threshold(threshold);
        Self {
            options,
            connections,
            writer,
            mapper: SchemaMapper::default(),
            observer,
            cancel: CancelFlag::new(),
            state: Mutex::new(StateTrack {
                current: LoadState::Init,
                history: vec![LoadState::Init],
            }),
        }
    }

    /// Resolve headers with `aliases` instead of the built-in claim-extract table.
    pub fn with_aliases(mut self, aliases: &AliasTable) -> Self {
        self.mapper = SchemaMapper::new(aliases);
        self
    }

    /// Share an existing cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn table(&self) -> &TargetTable {
        self.writer.table()
    }

    /// A handle that cancels the current run, or the next one when none is in progress.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn connection_stats(&self) -> PoolStats {
        self.connections.stats()
    }

    /// State of the most recent run.
    pub fn state(&self) -> LoadState {
        self.track().current
    }

    /// Every state the most recent run visited, in order.
    pub fn state_history(&self) -> Vec<LoadState> {
        self.track().history.clone()
    }

    /// Load everything `source` yields.
    pub fn run<R: Read>(&self, source: R) -> IngestionReport {
        self.execute(move || Ok(source))
    }

    /// Load the file at `path`. A file that cannot be opened aborts the run.
    pub fn run_path(&self, path: impl AsRef<Path>) -> IngestionReport {
        let path = path.as_ref();
        self.execute(|| Ok(BufReader::new(File::open(path)?)))
    }

    fn execute<R, F>(&self, open: F) -> IngestionReport
    where
        R: Read,
        F: FnOnce() -> LoadResult<R>,
    {
        let started = Instant::now();
        {
            let mut track = self.track();
            track.current = LoadState::Init;
            track.history = vec![LoadState::Init];
        }

        let report = ReportBuilder::new();
        let outcome = self.drive(open, &report);
        self.cancel.reset();
        let report = report.finish(outcome, started.elapsed());
        self.emit(LoadEvent::RunFinished {
            summary: report.summary(),
            elapsed: report.elapsed,
        });
        report
    }

    fn drive<R, F>(&self, open: F, report: &ReportBuilder) -> RunOutcome
    where
        R: Read,
        F: FnOnce() -> LoadResult<R>,
    {
        // Init
        if let Err(e) = self.options.validate() {
            return self.abort(AbortReason::Config, e);
        }
        let pool = match self.options.max_concurrent_batches {
            1 => None,
            n => match WorkerPool::new(n) {
                Ok(pool) => Some(pool),
                Err(e) => return self.abort(AbortReason::Config, e),
            },
        };
        // The first handle goes back to the idle list and serves the first batch.
        if let Err(e) = self.connections.acquire() {
            return self.abort(AbortReason::Connection, e);
        }

        // SchemaValidating
        self.transition(LoadState::SchemaValidating);
        let mut rows = match open().and_then(|src| DelimitedSource::new(src, &self.options)) {
            Ok(rows) => rows,
            Err(e) => return self.abort(classify(&e), e),
        };
        let mapping = match rows.header() {
            Some(header) => match self.mapper.resolve(header) {
                Ok(mapping) => mapping,
                Err(e) => return self.abort(AbortReason::Structural, e),
            },
            None => ColumnMapping::positional(),
        };
        self.emit(LoadEvent::HeaderResolved {
            mapped: mapping.mapped_count(),
            unmapped: mapping.unmapped().iter().map(|(_, h)| h.clone()).collect(),
        });
        let validator = RecordValidator::new(mapping)
            .with_constraints(self.options.validate_data)
            .with_target(self.table());

        // Streaming
        self.transition(LoadState::Streaming);
        let tags = match &self.options.batch_tag {
            Some(tag) => TagAssignment::Override(tag.clone()),
            None => TagAssignment::Inherit(BatchTag::from_timestamp(Utc::now())),
        };
        let mut source_error = None;
        let cancelled = {
            let records = rows
                .by_ref()
                .map_while(|row| match row {
                    Ok(row) => Some(row),
                    Err(e) => {
                        source_error = Some(e);
                        None
                    }
                })
                .filter_map(|row| {
                    report.row_read();
                    match validator.validate(&row.fields) {
                        RowOutcome::Valid(record) => {
                            report.row_validated();
                            Some(record)
                        }
                        RowOutcome::Rejected(reasons) => {
                            self.emit(LoadEvent::RowRejected {
                                line: row.line,
                                reasons: reasons.clone(),
                            });
                            report.row_rejected(LineError {
                                line: row.line,
                                physical_line: row.physical_line,
                                raw: row.raw,
                                reasons,
                            });
                            None
                        }
                    }
                });
            let batches = Batcher::new(records, self.options.batch_size, tags);
            match &pool {
                None => self.dispatch_sequential(batches, report),
                Some(pool) => self.dispatch_parallel(pool, batches, report),
            }
        };

        if rows.had_decode_errors() {
            report.warn(format!(
                "source contained byte sequences invalid in {}; they were replaced with U+FFFD",
                self.options.encoding
            ));
        }
        if let Some(e) = source_error {
            return self.abort(AbortReason::Source, e);
        }

        if cancelled {
            self.transition(LoadState::Cancelled);
        } else {
            self.transition(LoadState::Complete);
        }
        if self.options.verify_after_load {
            self.verify(report);
        }
        if cancelled {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        }
    }

    /// One batch in flight at a time. Returns whether the run was cancelled.
    fn dispatch_sequential<I>(&self, mut batches: I, report: &ReportBuilder) -> bool
    where
        I: Iterator<Item = Batch>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let Some(mut batch) = batches.next() else {
                return false;
            };
            self.write_batch(&mut batch, report);
        }
    }

    /// Up to `pool.max_in_flight()` batches in flight. A slot is reserved before the next batch
    /// is pulled from the source, so no more than that many batches are ever materialized.
    fn dispatch_parallel<I>(&self, pool: &WorkerPool, mut batches: I, report: &ReportBuilder) -> bool
    where
        I: Iterator<Item = Batch>,
    {
        pool.scope(|s| {
            loop {
                let permit = pool.reserve();
                if self.cancel.is_cancelled() {
                    return true;
                }
                let Some(mut batch) = batches.next() else {
                    return false;
                };
                s.spawn(move |_| {
                    let _permit = permit;
                    self.write_batch(&mut batch, report);
                });
            }
        })
    }

    fn write_batch(&self, batch: &mut Batch, report: &ReportBuilder) {
        report.batch_attempted();
        let by_tag = rows_per_tag(batch);
        let mut conn = match self.connections.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                let failure = self.writer.fail(batch, StoreError::unavailable(e.to_string()));
                report.batch_failed(failure);
                return;
            }
        };
        match self.writer.write(batch, &mut *conn) {
            Ok(rows) => report.batch_written(rows, by_tag),
            Err(failure) => {
                if failure.error.kind == StoreErrorKind::Unavailable {
                    conn.mark_broken();
                }
                report.batch_failed(failure);
            }
        }
    }

    /// Compare per-tag row counts in the store with what this run reports inserted.
    fn verify(&self, report: &ReportBuilder) {
        let expected = report.rows_by_tag();
        if expected.is_empty() {
            return;
        }
        let mut conn = match self.connections.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                report.warn(format!("verification skipped: {e}"));
                return;
            }
        };
        for (tag, expected) in expected {
            match conn.count_by_batch_tag(self.writer.table(), &tag) {
                Ok(actual) if actual == expected => {}
                Ok(actual) => {
                    report.warn(format!(
                        "verification mismatch for batch tag {tag}: expected {expected} rows, found {actual}"
                    ));
                    self.emit(LoadEvent::VerificationMismatch { tag, expected, actual });
                }
                Err(error) => {
                    report.warn(format!("verification query failed for batch tag {tag}: {error}"));
                    self.emit(LoadEvent::VerificationFailed { tag, error });
                }
            }
        }
    }

    fn abort(&self, reason: AbortReason, error: LoadError) -> RunOutcome {
        let message = error.to_string();
        self.transition(LoadState::Aborted);
        self.emit(LoadEvent::Aborted {
            reason: format!("{reason}: {message}"),
        });
        RunOutcome::Aborted { reason, message }
    }

    fn transition(&self, to: LoadState) {
        let from = {
            let mut track = self.track();
            let from = track.current;
            track.current = to;
            track.history.push(to);
            from
        };
        self.emit(LoadEvent::StateChanged { from, to });
    }

    fn track(&self) -> std::sync::MutexGuard<'_, StateTrack> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LoadEvent) {
        observability::emit(self.observer.as_ref(), self.options.alert_at_or_above, event);
    }
}

fn classify(error: &LoadError) -> AbortReason {
    match error {
        LoadError::Config { .. } => AbortReason::Config,
        LoadError::Io(_) | LoadError::Csv(_) => AbortReason::Source,
        _ => AbortReason::Structural,
    }
}

fn rows_per_tag(batch: &Batch) -> BTreeMap<BatchTag, u64> {
    let mut counts = BTreeMap::new();
    for record in &batch.records {
        let tag = record.batch_tag.as_ref().unwrap_or(&batch.tag);
        *counts.entry(tag.clone()).or_insert(0) += 1;
    }
    counts
}
