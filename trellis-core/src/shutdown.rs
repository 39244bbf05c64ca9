//! Connection draining for graceful shutdown.
//!
//! Each listener kind keeps two trackers: one counting live accept loops
//! and one counting open connections. Shutdown stops both from admitting
//! new entries, tells the connections to finish, then waits for the counts
//! to reach zero against a deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{info, warn};

/// Lifecycle instruction broadcast to accept loops and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Running,
    /// Stop accepting; let in-flight requests complete.
    Graceful,
    /// Drop everything now.
    Abort,
}

/// Resolves once `signal` leaves [`Signal::Running`] or its sender is gone.
pub(crate) async fn stopped(signal: &mut watch::Receiver<Signal>) -> Signal {
    loop {
        let current = *signal.borrow_and_update();
        if current != Signal::Running {
            return current;
        }
        if signal.changed().await.is_err() {
            return Signal::Abort;
        }
    }
}

#[derive(Debug)]
struct TrackerInner {
    active: AtomicU64,
    accepting: AtomicBool,
    drained: Notify,
}

/// Counts live entries and wakes drainers when the count hits zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                active: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                drained: Notify::new(),
            }),
        }
    }

    /// Register an entry. Returns `None` once accepting has stopped.
    pub fn increment(&self) -> Option<ConnectionGuard> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return None;
        }
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        Some(ConnectionGuard {
            tracker: self.clone(),
        })
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn stop_accepting(&self) {
        self.inner.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Wait until no entries remain or `deadline` passes.
    ///
    /// Returns true if drained in time.
    pub async fn drain_until(&self, deadline: Instant) -> bool {
        loop {
            let notified = self.inner.drained.notified();
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.active_count();
                if remaining > 0 {
                    warn!(remaining, "Drain deadline reached");
                    return false;
                }
                return true;
            }
        }
    }

    fn decrement(&self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration; decrements the tracker on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
///
/// ```no_run
/// # async fn run(server: trellis_core::Server) {
/// use std::time::Duration;
///
/// let background = server.clone();
/// tokio::spawn(async move { background.start("0.0.0.0:8080").await });
/// trellis_core::shutdown::signal().await;
/// server.shutdown(Duration::from_secs(10)).await.ok();
/// # }
/// ```
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tracker_counts_guards() {
        let tracker = ConnectionTracker::new();
        let first = tracker.increment().unwrap();
        let _second = tracker.increment().unwrap();
        assert_eq!(tracker.active_count(), 2);
        drop(first);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_stop_accepting() {
        let tracker = ConnectionTracker::new();
        tracker.stop_accepting();
        assert!(!tracker.is_accepting());
        assert!(tracker.increment().is_none());
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.increment().unwrap();
        let drained = tracker
            .drain_until(Instant::now() + Duration::from_millis(50))
            .await;
        assert!(!drained);
    }

    #[tokio::test]
    async fn test_drain_wakes_on_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.increment().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(
            tracker
                .drain_until(Instant::now() + Duration::from_secs(5))
                .await
        );
    }

    #[tokio::test]
    async fn test_stopped_sees_current_state() {
        let (tx, mut rx) = watch::channel(Signal::Running);
        tx.send_replace(Signal::Graceful);
        assert_eq!(stopped(&mut rx).await, Signal::Graceful);
    }
}
