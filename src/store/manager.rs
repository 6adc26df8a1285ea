use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{LoadOptions, RetryBackoff};
use crate::error::{LoadError, LoadResult};
use crate::observability::{self, LoadEvent, LoadObserver, NoopObserver, Severity};

use super::{Connector, StoreConnection};

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bounded retry schedule for opening connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    pub backoff: RetryBackoff,
    /// Timeout handed to every individual connection attempt.
    pub connect_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_options(opts: &LoadOptions) -> Self {
        Self {
            max_retries: opts.max_connection_retries,
            delay: opts.retry_delay(),
            backoff: opts.retry_backoff,
            connect_timeout: opts.connect_timeout(),
        }
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `failed_attempt`-th (1-based) failure.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => {
                let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&LoadOptions::default())
    }
}

/// Connection counters, for monitoring and for proving every handle was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub opened: u64,
    pub acquired: u64,
    pub released: u64,
    pub idle: usize,
}

/// Issues connections with bounded retry and takes them back when handles drop.
///
/// Released connections are kept for reuse, up to `max_idle`.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: RetryPolicy,
    idle: Mutex<Vec<C::Connection>>,
    max_idle: usize,
    observer: Arc<dyn LoadObserver>,
    alert_at_or_above: Severity,
    opened: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("policy", &self.policy)
            .field("max_idle", &self.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, policy: RetryPolicy, observer: Arc<dyn LoadObserver>) -> Self {
        Self {
            connector,
            policy,
            idle: Mutex::new(Vec::new()),
            max_idle: 1,
            observer,
            alert_at_or_above: Severity::Critical,
            opened: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// A manager with the default policy and no observer.
    pub fn with_defaults(connector: C) -> Self {
        Self::new(connector, RetryPolicy::default(), Arc::new(NoopObserver))
    }

    /// Keep up to `n` released connections for reuse (at least one).
    pub fn with_max_idle(mut self, n: usize) -> Self {
        self.max_idle = n.max(1);
        self
    }

    pub fn with_alert_threshold(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            opened: self.opened.load(Ordering::SeqCst),
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            idle: self.idle.lock().map(|idle| idle.len()).unwrap_or(0),
        }
    }

    /// Acquire a connection, reusing an idle one when available.
    ///
    /// The returned handle gives the connection back when dropped, on every exit path.
    /// Fails with [`LoadError::Connection`] once `max_retries + 1` attempts have failed.
    pub fn acquire(&self) -> LoadResult<ConnectionHandle<'_, C>> {
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let conn = match reused {
            Some(conn) => conn,
            None => self.open_with_retry()?,
        };
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionHandle {
            manager: self,
            conn: Some(conn),
            broken: false,
        })
    }

    /// Acquire a connection and ping it. Returns the probe's round-trip time.
    pub fn health_check(&self) -> LoadResult<Duration> {
        let mut handle = self.acquire()?;
        let start = Instant::now();
        match handle.ping() {
            Ok(()) => Ok(start.elapsed()),
            Err(e) => {
                handle.mark_broken();
                Err(e.into())
            }
        }
    }

    fn open_with_retry(&self) -> LoadResult<C::Connection> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.connect(self.policy.connect_timeout) {
                Ok(conn) => {
                    self.opened.fetch_add(1, Ordering::SeqCst);
                    self.emit(LoadEvent::ConnectionOpened { attempt });
                    return Ok(conn);
                }
                Err(error) => {
                    let retry_in = (attempt < max_attempts).then(|| self.policy.delay_after(attempt));
                    let message = error.message.clone();
                    self.emit(LoadEvent::ConnectionAttemptFailed {
                        attempt,
                        max_attempts,
                        error,
                        retry_in,
                    });
                    match retry_in {
                        Some(delay) => std::thread::sleep(delay),
                        None => {
                            return Err(LoadError::Connection {
                                attempts: attempt,
                                message,
                            });
                        }
                    }
                }
            }
        }
    }

    fn release(&self, conn: C::Connection, healthy: bool) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if !healthy {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }

    fn emit(&self, event: LoadEvent) {
        observability::emit(self.observer.as_ref(), self.alert_at_or_above, event);
    }
}

/// Exclusive use of one connection, returned to its [`ConnectionManager`] on drop.
pub struct ConnectionHandle<'a, C: Connector> {
    manager: &'a ConnectionManager<C>,
    conn: Option<C::Connection>,
    broken: bool,
}

impl<C: Connector> ConnectionHandle<'_, C> {
    /// Discard the connection on release instead of keeping it for reuse.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for ConnectionHandle<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the connection out.
        self.conn.as_ref().expect("connection handle used after release")
    }
}

impl<C: Connector> DerefMut for ConnectionHandle<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection handle used after release")
    }
}

impl<C: Connector> Drop for ConnectionHandle<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let healthy = !self.broken && !std::thread::panicking();
            self.manager.release(conn, healthy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::ZERO,
            backoff: RetryBackoff::Fixed,
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn retries_until_success_within_budget() {
        let store = MemoryStore::new();
        store.fail_next_connects(3);
        let mgr = ConnectionManager::new(store.connector(), policy(3), Arc::new(NoopObserver));

        let handle = mgr.acquire().unwrap();
        drop(handle);
        assert_eq!(store.connect_attempts(), 4);
        assert_eq!(mgr.stats().opened, 1);
    }

    #[test]
    fn exhausting_retries_is_a_connection_error() {
        let store = MemoryStore::new();
        store.fail_next_connects(4);
        let mgr = ConnectionManager::new(store.connector(), policy(3), Arc::new(NoopObserver));

        let err = mgr.acquire().err().expect("acquire should fail");
        assert!(matches!(err, LoadError::Connection { attempts: 4, .. }), "got {err}");
        assert_eq!(mgr.stats().opened, 0);
    }

    #[test]
    fn released_connections_are_reused() {
        let store = MemoryStore::new();
        let mgr = ConnectionManager::with_defaults(store.connector());
        for _ in 0..5 {
            let _h = mgr.acquire().unwrap();
        }
        let stats = mgr.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.acquired, 5);
        assert_eq!(stats.released, 5);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn broken_handles_are_discarded() {
        let store = MemoryStore::new();
        let mgr = ConnectionManager::with_defaults(store.connector());
        {
            let mut h = mgr.acquire().unwrap();
            h.mark_broken();
        }
        assert_eq!(mgr.stats().idle, 0);
        let _h = mgr.acquire().unwrap();
        assert_eq!(mgr.stats().opened, 2);
    }

    #[test]
    fn handle_is_released_when_holder_panics() {
        let store = MemoryStore::new();
        let mgr = ConnectionManager::with_defaults(store.connector());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _h = mgr.acquire().unwrap();
            panic!("writer blew up");
        }));
        assert!(result.is_err());
        let stats = mgr.stats();
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn health_check_pings() {
        let store = MemoryStore::new();
        let mgr = ConnectionManager::with_defaults(store.connector());
        mgr.health_check().unwrap();

        store.fail_pings(true);
        assert!(mgr.health_check().is_err());
        assert_eq!(mgr.stats().idle, 0);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            backoff: RetryBackoff::Exponential,
            delay: Duration::from_millis(100),
            ..policy(10)
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(4), Duration::from_millis(800));
        assert_eq!(p.delay_after(30), MAX_RETRY_DELAY);
        assert_eq!(policy(0).max_attempts(), 1);
    }
}
