//! Ingestion report.
//!
//! A run accumulates into a [`ReportBuilder`], which is safe to update from several writer
//! threads at once (atomic counters, mutex-guarded appends). [`ReportBuilder::finish`] freezes it
//! into an [`IngestionReport`], the only thing a caller gets back from a run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::types::BatchTag;
use crate::validation::RejectReason;
use crate::writer::BatchFailure;

/// Why a run stopped before reaching the end of its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The store stayed unreachable after every retry.
    Connection,
    /// The header was absent or did not fit the target table.
    Structural,
    /// The source could not be read.
    Source,
    /// The options were invalid.
    Config,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Structural => "structural",
            Self::Source => "source",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The source was exhausted. Some or all batches may still have failed.
    Completed,
    /// Cancellation was requested and honoured between batches.
    Cancelled,
    Aborted { reason: AbortReason, message: String },
}

/// A rejected source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineError {
    /// 1-based record number, not counting the header row.
    pub line: u64,
    pub physical_line: u64,
    pub raw: String,
    pub reasons: Vec<RejectReason>,
}

/// Final, read-only result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub outcome: RunOutcome,
    pub total_read: u64,
    pub validated: u64,
    pub rejected: u64,
    pub batches_attempted: u64,
    pub batches_failed: u64,
    pub rows_inserted: u64,
    /// Row rejections in line order.
    pub errors: Vec<LineError>,
    /// Failed batches in batch-index order.
    pub batch_failures: Vec<BatchFailure>,
    /// Non-fatal findings such as verification mismatches.
    pub warnings: Vec<String>,
    /// Rows inserted per batch tag.
    pub rows_by_tag: BTreeMap<BatchTag, u64>,
    pub elapsed: Duration,
}

impl IngestionReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match &self.outcome {
            RunOutcome::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match &self.outcome {
            RunOutcome::Aborted { reason, message } => {
                format!("aborted ({reason}) before completion: {message}")
            }
            RunOutcome::Completed => format!(
                "completed with {} row rejections / {} batch failures ({} of {} rows inserted)",
                self.rejected, self.batches_failed, self.rows_inserted, self.validated
            ),
            RunOutcome::Cancelled => format!(
                "cancelled after {} batches with {} row rejections / {} batch failures ({} rows inserted)",
                self.batches_attempted, self.rejected, self.batches_failed, self.rows_inserted
            ),
        }
    }
}

/// Concurrency-safe accumulator for an [`IngestionReport`].
#[derive(Debug, Default)]
pub struct ReportBuilder {
    total_read: AtomicU64,
    validated: AtomicU64,
    rejected: AtomicU64,
    batches_attempted: AtomicU64,
    batches_failed: AtomicU64,
    rows_inserted: AtomicU64,
    errors: Mutex<Vec<LineError>>,
    batch_failures: Mutex<Vec<BatchFailure>>,
    warnings: Mutex<Vec<String>>,
    rows_by_tag: Mutex<BTreeMap<BatchTag, u64>>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_read(&self) {
        self.total_read.fetch_add(1, Ordering::SeqCst);
    }

    pub fn row_validated(&self) {
        self.validated.fetch_add(1, Ordering::SeqCst);
    }

    pub fn row_rejected(&self, error: LineError) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        lock(&self.errors).push(error);
    }

    pub fn batch_attempted(&self) {
        self.batches_attempted.fetch_add(1, Ordering::SeqCst);
    }

    /// A batch was accepted. `by_tag` splits the batch's rows per tag.
    pub fn batch_written(&self, rows: u64, by_tag: impl IntoIterator<Item = (BatchTag, u64)>) {
        self.rows_inserted.fetch_add(rows, Ordering::SeqCst);
        let mut tags = lock(&self.rows_by_tag);
        for (tag, n) in by_tag {
            *tags.entry(tag).or_insert(0) += n;
        }
    }

    pub fn batch_failed(&self, failure: BatchFailure) {
        self.batches_failed.fetch_add(1, Ordering::SeqCst);
        lock(&self.batch_failures).push(failure);
    }

    pub fn warn(&self, warning: impl Into<String>) {
        lock(&self.warnings).push(warning.into());
    }

    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted.load(Ordering::SeqCst)
    }

    /// Rows inserted so far, per tag.
    pub fn rows_by_tag(&self) -> BTreeMap<BatchTag, u64> {
        lock(&self.rows_by_tag).clone()
    }

    /// Freeze into the final report.
    pub fn finish(self, outcome: RunOutcome, elapsed: Duration) -> IngestionReport {
        let mut errors = self.errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        errors.sort_by_key(|e| e.line);
        let mut batch_failures = self
            .batch_failures
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        batch_failures.sort_by_key(|f| f.index);

        IngestionReport {
            outcome,
            total_read: self.total_read.into_inner(),
            validated: self.validated.into_inner(),
            rejected: self.rejected.into_inner(),
            batches_attempted: self.batches_attempted.into_inner(),
            batches_failed: self.batches_failed.into_inner(),
            rows_inserted: self.rows_inserted.into_inner(),
            errors,
            batch_failures,
            warnings: self.warnings.into_inner().unwrap_or_else(PoisonError::into_inner),
            rows_by_tag: self.rows_by_tag.into_inner().unwrap_or_else(PoisonError::into_inner),
            elapsed,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::StoreError;
    use crate::types::CanonicalField;

    #[test]
    fn concurrent_updates_are_not_lost() {
        let builder = Arc::new(ReportBuilder::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let b = Arc::clone(&builder);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        b.row_read();
                        b.batch_written(2, [(BatchTag::new(format!("T{}", t % 2)), 2)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let b = Arc::into_inner(builder).unwrap();
        let report = b.finish(RunOutcome::Completed, Duration::ZERO);
        assert_eq!(report.total_read, 8000);
        assert_eq!(report.rows_inserted, 16_000);
        assert_eq!(report.rows_by_tag[&BatchTag::new("T0")], 8000);
        assert_eq!(report.rows_by_tag[&BatchTag::new("T1")], 8000);
    }

    #[test]
    fn finish_orders_lists() {
        let b = ReportBuilder::new();
        for line in [5, 2] {
            b.row_rejected(LineError {
                line,
                physical_line: line + 1,
                raw: String::new(),
                reasons: vec![RejectReason::Invalid {
                    field: CanonicalField::Quarter,
                }],
            });
        }
        for index in [3, 1] {
            b.batch_failed(BatchFailure {
                index,
                tag: BatchTag::new("T"),
                rows: 10,
                error: StoreError::rejected("nope"),
            });
        }
        let report = b.finish(RunOutcome::Completed, Duration::ZERO);
        assert_eq!(report.errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(report.batch_failures.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.batches_failed, 2);
    }

    #[test]
    fn summary_distinguishes_aborted_from_completed() {
        let done = ReportBuilder::new().finish(RunOutcome::Completed, Duration::ZERO);
        assert_eq!(
            done.summary(),
            "completed with 0 row rejections / 0 batch failures (0 of 0 rows inserted)"
        );

        let aborted = ReportBuilder::new().finish(
            RunOutcome::Aborted {
                reason: AbortReason::Connection,
                message: "refused".into(),
            },
            Duration::ZERO,
        );
        assert!(aborted.is_aborted());
        assert_eq!(aborted.abort_reason(), Some(AbortReason::Connection));
        assert_eq!(aborted.summary(), "aborted (connection) before completion: refused");
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let report = ReportBuilder::new().finish(RunOutcome::Cancelled, Duration::from_millis(5));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "cancelled");
        assert_eq!(json["rowsInserted"], 0);
        assert!(json.get("batchFailures").is_some());
    }
}
