//! Lifecycle control channel.
//!
//! OS signals are bridged onto an explicit control channel carrying two
//! messages: [`ControlSignal::Shutdown`] (terminate immediately) and
//! [`ControlSignal::Drain`] (stop accepting, finish in-flight requests).
//! The supervisor and every scheduler watch the resulting
//! [`LifecyclePhase`] instead of handling signals themselves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

/// A control message delivered to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Terminate immediately, abandoning in-flight requests.
    Shutdown,
    /// Stop accepting new connections and exit once in-flight requests
    /// complete.
    Drain,
}

/// The phase the server is in, as seen by schedulers and the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    /// Accepting and serving connections.
    #[default]
    Running,
    /// No longer accepting; in-flight requests run to completion.
    Draining,
    /// Terminating immediately.
    Stopping,
}

/// Shared handle to the lifecycle control channel.
///
/// Cloning shares the channel; all subscribers observe the same phase.
///
/// # Example
///
/// ```rust
/// use canopy_server::{ControlSignal, Lifecycle, LifecyclePhase};
///
/// let lifecycle = Lifecycle::new();
/// assert_eq!(lifecycle.phase(), LifecyclePhase::Running);
///
/// lifecycle.signal(ControlSignal::Drain);
/// assert_eq!(lifecycle.phase(), LifecyclePhase::Draining);
///
/// lifecycle.signal(ControlSignal::Shutdown);
/// assert_eq!(lifecycle.phase(), LifecyclePhase::Stopping);
/// ```
#[derive(Debug, Clone)]
pub struct Lifecycle {
    sender: Arc<watch::Sender<LifecyclePhase>>,
}

impl Lifecycle {
    /// Creates a lifecycle channel in the running phase.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(LifecyclePhase::Running);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a lifecycle channel driven by OS signals.
    ///
    /// SIGTERM and SIGINT deliver [`ControlSignal::Shutdown`]; SIGHUP
    /// delivers [`ControlSignal::Drain`] and stays armed for later
    /// signals. Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let lifecycle = Self::new();
        let bridge = lifecycle.clone();
        tokio::spawn(async move {
            bridge.run_signal_bridge().await;
        });
        lifecycle
    }

    /// Delivers a control message.
    ///
    /// A `Drain` only moves the phase forward from `Running`; a `Shutdown`
    /// always wins.
    pub fn signal(&self, signal: ControlSignal) {
        self.sender.send_if_modified(|phase| match signal {
            ControlSignal::Shutdown => {
                if *phase == LifecyclePhase::Stopping {
                    false
                } else {
                    *phase = LifecyclePhase::Stopping;
                    true
                }
            }
            ControlSignal::Drain => {
                if *phase == LifecyclePhase::Running {
                    *phase = LifecyclePhase::Draining;
                    true
                } else {
                    false
                }
            }
        });
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        *self.sender.borrow()
    }

    /// Subscribes to phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.sender.subscribe()
    }

    #[cfg(unix)]
    async fn run_signal_bridge(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to register SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to register SIGINT handler");
                return;
            }
        };
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to register SIGHUP handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::error!("SIGTERM received");
                    self.signal(ControlSignal::Shutdown);
                    return;
                }
                _ = sigint.recv() => {
                    tracing::info!("caught keyboard interrupt, exiting");
                    self.signal(ControlSignal::Shutdown);
                    return;
                }
                _ = sighup.recv() => {
                    // The stream keeps delivering later SIGHUPs, so the
                    // handler is re-armed for a future reload.
                    tracing::error!("SIGHUP received");
                    self.signal(ControlSignal::Drain);
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn run_signal_bridge(&self) {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("caught keyboard interrupt, exiting");
            self.signal(ControlSignal::Shutdown);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks in-flight connections so a draining worker can wait for its
/// pool to empty before exiting.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no active connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Registers a connection; the token must be held for its duration.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of in-flight connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every in-flight connection completes.
    pub async fn wait_for_drain(&self) {
        loop {
            // Register interest before the check so a token dropped in
            // between still wakes this waiter.
            let notified = self.notify.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII token for one in-flight connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_initial_phase_is_running() {
        assert_eq!(Lifecycle::new().phase(), LifecyclePhase::Running);
    }

    #[test]
    fn test_drain_then_shutdown() {
        let lifecycle = Lifecycle::new();
        lifecycle.signal(ControlSignal::Drain);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Draining);
        lifecycle.signal(ControlSignal::Shutdown);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Stopping);
    }

    #[test]
    fn test_drain_never_downgrades_stopping() {
        let lifecycle = Lifecycle::new();
        lifecycle.signal(ControlSignal::Shutdown);
        lifecycle.signal(ControlSignal::Drain);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Stopping);
    }

    #[test]
    fn test_signals_are_idempotent() {
        let lifecycle = Lifecycle::new();
        lifecycle.signal(ControlSignal::Drain);
        lifecycle.signal(ControlSignal::Drain);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Draining);
        lifecycle.signal(ControlSignal::Shutdown);
        lifecycle.signal(ControlSignal::Shutdown);
        assert_eq!(lifecycle.phase(), LifecyclePhase::Stopping);
    }

    #[test]
    fn test_clones_share_the_channel() {
        let lifecycle = Lifecycle::new();
        let clone = lifecycle.clone();
        lifecycle.signal(ControlSignal::Drain);
        assert_eq!(clone.phase(), LifecyclePhase::Draining);
    }

    #[tokio::test]
    async fn test_subscriber_sees_phase_change() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.signal(ControlSignal::Drain);
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("phase change should be observed")
            .expect("channel should stay open");
        assert_eq!(*rx.borrow(), LifecyclePhase::Draining);
    }

    #[test]
    fn test_tracker_counts_tokens() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_connections(), 0);

        let token1 = tracker.acquire();
        let token2 = tracker.acquire();
        assert_eq!(tracker.active_connections(), 2);

        drop(token1);
        assert_eq!(tracker.active_connections(), 1);
        drop(token2);
        assert_eq!(tracker.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_drain_immediate_when_idle() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(10), tracker.wait_for_drain())
            .await
            .expect("drain should complete immediately");
    }

    #[tokio::test]
    async fn test_wait_for_drain_waits_for_tokens() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_drain().await })
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain should complete")
            .expect("waiter should not panic");
    }
}
