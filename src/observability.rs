//! Logging collaborator for the load pipeline.
//!
//! Components never log through a global: each one receives an `Arc<dyn LoadObserver>` at
//! construction and reports [`LoadEvent`]s to it. Events whose [`LoadEvent::severity`] meets the
//! configured threshold are additionally delivered through [`LoadObserver::on_alert`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::LoadState;
use crate::error::StoreError;
use crate::types::BatchTag;
use crate::validation::RejectReason;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (a row or batch was lost, the run continues).
    Error,
    /// Critical error (the run cannot continue).
    Critical,
}

/// Events emitted while a load runs.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    StateChanged {
        from: LoadState,
        to: LoadState,
    },
    ConnectionAttemptFailed {
        attempt: u32,
        max_attempts: u32,
        error: StoreError,
        retry_in: Option<Duration>,
    },
    ConnectionOpened {
        attempt: u32,
    },
    HeaderResolved {
        mapped: usize,
        unmapped: Vec<String>,
    },
    RowRejected {
        line: u64,
        reasons: Vec<RejectReason>,
    },
    BatchWritten {
        index: usize,
        tag: BatchTag,
        rows: u64,
        elapsed: Duration,
    },
    BatchFailed {
        index: usize,
        tag: BatchTag,
        rows: usize,
        error: StoreError,
    },
    VerificationMismatch {
        tag: BatchTag,
        expected: u64,
        actual: u64,
    },
    VerificationFailed {
        tag: BatchTag,
        error: StoreError,
    },
    Aborted {
        reason: String,
    },
    RunFinished {
        summary: String,
        elapsed: Duration,
    },
}

impl LoadEvent {
    pub fn severity(&self) -> Severity {
        match self {
            Self::StateChanged { .. }
            | Self::ConnectionOpened { .. }
            | Self::HeaderResolved { .. }
            | Self::BatchWritten { .. }
            | Self::RunFinished { .. } => Severity::Info,
            Self::ConnectionAttemptFailed { .. }
            | Self::RowRejected { .. }
            | Self::VerificationMismatch { .. }
            | Self::VerificationFailed { .. } => Severity::Warning,
            Self::BatchFailed { .. } => Severity::Error,
            Self::Aborted { .. } => Severity::Critical,
        }
    }
}

impl fmt::Display for LoadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged { from, to } => write!(f, "state {from:?} -> {to:?}"),
            Self::ConnectionAttemptFailed {
                attempt,
                max_attempts,
                error,
                retry_in,
            } => write!(
                f,
                "connection attempt {attempt}/{max_attempts} failed: {error} (retry_in={retry_in:?})"
            ),
            Self::ConnectionOpened { attempt } => write!(f, "connection opened on attempt {attempt}"),
            Self::HeaderResolved { mapped, unmapped } => {
                write!(f, "header resolved mapped={mapped} unmapped={unmapped:?}")
            }
            Self::RowRejected { line, reasons } => {
                let reasons = reasons.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "line {line} rejected: {}", reasons.join("; "))
            }
            Self::BatchWritten {
                index,
                tag,
                rows,
                elapsed,
            } => write!(f, "batch {index} tag={tag} rows={rows} written in {elapsed:?}"),
            Self::BatchFailed {
                index,
                tag,
                rows,
                error,
            } => write!(f, "batch {index} tag={tag} rows={rows} failed: {error}"),
            Self::VerificationMismatch { tag, expected, actual } => {
                write!(f, "verification mismatch tag={tag} expected={expected} actual={actual}")
            }
            Self::VerificationFailed { tag, error } => {
                write!(f, "verification query failed tag={tag}: {error}")
            }
            Self::Aborted { reason } => write!(f, "run aborted: {reason}"),
            Self::RunFinished { summary, elapsed } => write!(f, "run finished in {elapsed:?}: {summary}"),
        }
    }
}

/// Observer interface for load events.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait LoadObserver: Send + Sync {
    fn on_event(&self, _event: &LoadEvent) {}

    /// Called when an event meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_event`].
    fn on_alert(&self, event: &LoadEvent) {
        self.on_event(event)
    }
}

/// Deliver `event` to `observer`, escalating to `on_alert` at or above `threshold`.
pub(crate) fn emit(observer: &dyn LoadObserver, threshold: Severity, event: LoadEvent) {
    observer.on_event(&event);
    if event.severity() >= threshold {
        observer.on_alert(&event);
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_event(&self, event: &LoadEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }

    fn on_alert(&self, event: &LoadEvent) {
        for o in &self.observers {
            o.on_alert(event);
        }
    }
}

/// Logs load events to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl LoadObserver for StdErrObserver {
    fn on_event(&self, event: &LoadEvent) {
        eprintln!("[load][{:?}] {event}", event.severity());
    }

    fn on_alert(&self, event: &LoadEvent) {
        eprintln!("[ALERT][load][{:?}] {event}", event.severity());
    }
}

/// Forwards load events to the `tracing` ecosystem under the `claims_loader` target.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_event(&self, event: &LoadEvent) {
        match event.severity() {
            Severity::Info => tracing::info!(target: "claims_loader", "{event}"),
            Severity::Warning => tracing::warn!(target: "claims_loader", "{event}"),
            Severity::Error | Severity::Critical => tracing::error!(target: "claims_loader", "{event}"),
        }
    }

    fn on_alert(&self, event: &LoadEvent) {
        tracing::error!(target: "claims_loader", alert = true, severity = ?event.severity(), "{event}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::CanonicalField;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<Severity>>,
        alerts: Mutex<Vec<Severity>>,
    }

    impl LoadObserver for Recording {
        fn on_event(&self, event: &LoadEvent) {
            self.events.lock().unwrap().push(event.severity());
        }

        fn on_alert(&self, event: &LoadEvent) {
            self.alerts.lock().unwrap().push(event.severity());
        }
    }

    #[test]
    fn emit_alerts_only_at_threshold() {
        let obs = Recording::default();
        emit(&obs, Severity::Error, LoadEvent::ConnectionOpened { attempt: 1 });
        emit(
            &obs,
            Severity::Error,
            LoadEvent::BatchFailed {
                index: 0,
                tag: BatchTag::new("T"),
                rows: 3,
                error: StoreError::rejected("boom"),
            },
        );

        assert_eq!(*obs.events.lock().unwrap(), vec![Severity::Info, Severity::Error]);
        assert_eq!(*obs.alerts.lock().unwrap(), vec![Severity::Error]);
    }

    #[test]
    fn composite_fans_out() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let composite = CompositeObserver::new(vec![a.clone(), b.clone()]);
        composite.on_event(&LoadEvent::Aborted {
            reason: "x".to_string(),
        });
        assert_eq!(a.events.lock().unwrap().len(), 1);
        assert_eq!(b.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn row_rejection_display_lists_reasons() {
        let ev = LoadEvent::RowRejected {
            line: 2,
            reasons: vec![
                RejectReason::Invalid {
                    field: CanonicalField::Quarter,
                },
                RejectReason::Required {
                    field: CanonicalField::MemberId,
                },
            ],
        };
        assert_eq!(ev.to_string(), "line 2 rejected: invalid quarter; memberId required");
        assert_eq!(ev.severity(), Severity::Warning);
    }
}
