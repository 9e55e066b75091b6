//! Worker supervision.
//!
//! The supervisor owns the whole server lifecycle: it acquires the shared
//! listening socket, runs either a single in-process scheduler (worker
//! count 0) or a fleet of worker threads, replaces workers that die while
//! the server is running, and tears the socket down on exit. All mutable
//! supervision state lives in the one owned [`Supervisor`] value.
//!
//! Workers are named OS threads, each running a current-thread runtime and
//! a [`ConnectionScheduler`](crate::ConnectionScheduler) over a duplicated
//! handle of the one listening socket; the kernel balances accepted
//! connections across the duplicates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use canopy_dispatch::Dispatcher;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::lifecycle::{Lifecycle, LifecyclePhase};
use crate::listener::Listener;
use crate::scheduler::ConnectionScheduler;

/// How long a hard stop waits for workers to wind down.
const HARD_STOP_REAP_WINDOW: Duration = Duration::from_secs(5);

/// Supervisor lifecycle states.
///
/// `Starting → Running → Draining → Stopped`; a hard stop jumps straight
/// to `Stopped`. Replacements are only spawned in `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Workers are being spawned; no exits observed yet.
    Starting,
    /// Serving traffic; dead workers are replaced.
    Running,
    /// Soft stop in progress; dead workers are not replaced.
    Draining,
    /// All supervision has ended; the socket is closed.
    Stopped,
}

impl SupervisorState {
    /// Returns whether a worker exit in this state triggers a replacement.
    #[must_use]
    pub const fn should_respawn(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Exit notification delivered when a worker thread ends, however it ends.
#[derive(Debug)]
struct WorkerExit {
    id: usize,
    panicked: bool,
}

/// Drop guard inside each worker thread; fires on normal return and on
/// panic alike, so the supervisor always observes the exit.
struct WorkerExitGuard {
    id: usize,
    tx: mpsc::UnboundedSender<WorkerExit>,
}

impl Drop for WorkerExitGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerExit {
            id: self.id,
            panicked: std::thread::panicking(),
        });
    }
}

/// The process supervisor.
///
/// # Example
///
/// ```rust,ignore
/// use canopy_dispatch::{Dispatcher, Router};
/// use canopy_server::{ServerConfig, Supervisor};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::builder().workers(4).build();
///     let dispatcher = Dispatcher::new(router);
///
///     let supervisor = Supervisor::new(config, dispatcher).with_os_signals();
///     supervisor.run().await?;
///     Ok(())
/// }
/// ```
pub struct Supervisor {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Lifecycle,
    state: SupervisorState,
    workers: HashMap<usize, std::thread::JoinHandle<()>>,
    next_worker_id: usize,
}

impl Supervisor {
    /// Creates a supervisor over a finished dispatcher.
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Dispatcher) -> Self {
        let dispatcher = dispatcher
            .with_max_body_size(config.max_body_size())
            .with_debug(config.verbose() || config.debug());
        let dispatcher = match config.action_timeout() {
            Some(timeout) => dispatcher.with_action_timeout(timeout),
            None => dispatcher,
        };
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            lifecycle: Lifecycle::new(),
            state: SupervisorState::Starting,
            workers: HashMap::new(),
            next_worker_id: 0,
        }
    }

    /// Bridges OS signals onto the control channel.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn with_os_signals(mut self) -> Self {
        self.lifecycle = Lifecycle::with_os_signals();
        self
    }

    /// Returns the control channel handle.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Acquires the listening socket and runs to completion.
    ///
    /// # Errors
    ///
    /// Startup failures ([`ServerError::Configuration`],
    /// [`ServerError::BindTimeout`]) abort before any worker is spawned.
    pub async fn run(self) -> Result<(), ServerError> {
        let config = self.config.clone();
        let listener = tokio::task::spawn_blocking(move || Listener::acquire(&config))
            .await
            .map_err(|err| {
                ServerError::Configuration(format!("listener acquisition task failed: {err}"))
            })??;
        self.run_with_listener(listener).await
    }

    /// Runs over an already-acquired listening socket.
    pub async fn run_with_listener(mut self, listener: Listener) -> Result<(), ServerError> {
        if self.config.workers() == 0 {
            return self.run_single_process(listener).await;
        }

        tracing::info!(workers = self.config.workers(), "starting workers");
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        while self.workers.len() < self.config.workers() {
            self.spawn_worker(&listener, &exit_tx)?;
        }
        self.state = SupervisorState::Running;

        let mut control = self.lifecycle.subscribe();
        loop {
            tokio::select! {
                Some(exit) = exit_rx.recv() => {
                    self.workers.remove(&exit.id);
                    tracing::error!(
                        worker_id = exit.id,
                        panicked = exit.panicked,
                        "removing dead worker"
                    );
                    if self.state.should_respawn() {
                        if let Err(err) = self.spawn_worker(&listener, &exit_tx) {
                            tracing::error!(error = %err, "failed to spawn replacement worker");
                        }
                    } else if self.workers.is_empty() {
                        break;
                    }
                }
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    match *control.borrow_and_update() {
                        LifecyclePhase::Draining => {
                            tracing::info!("draining, dead workers will not be replaced");
                            self.state = SupervisorState::Draining;
                            if self.workers.is_empty() {
                                break;
                            }
                        }
                        LifecyclePhase::Stopping => break,
                        LifecyclePhase::Running => {}
                    }
                }
            }
        }

        // Hard stop: give workers a bounded window to observe the signal
        // and wind down before the socket goes away.
        if !self.workers.is_empty() {
            let deadline = tokio::time::Instant::now() + HARD_STOP_REAP_WINDOW;
            while !self.workers.is_empty() {
                match tokio::time::timeout_at(deadline, exit_rx.recv()).await {
                    Ok(Some(exit)) => {
                        self.workers.remove(&exit.id);
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            if !self.workers.is_empty() {
                tracing::warn!(
                    workers = self.workers.len(),
                    "workers still alive at shutdown"
                );
            }
        }

        self.state = SupervisorState::Stopped;
        listener.shutdown();
        tracing::debug!("supervisor exited");
        Ok(())
    }

    /// Runs a single in-process scheduler. Useful for profiling, tests and
    /// debugging.
    async fn run_single_process(mut self, listener: Listener) -> Result<(), ServerError> {
        tracing::info!("starting single process server");
        let scheduler = ConnectionScheduler::new(
            listener.try_clone_socket()?,
            listener.tls().cloned(),
            Arc::clone(&self.dispatcher),
            self.config.pool_size(),
            self.lifecycle.subscribe(),
            0,
        )?;
        self.state = SupervisorState::Running;

        let result = scheduler.run().await;

        self.state = SupervisorState::Stopped;
        listener.shutdown();
        result
    }

    /// Spawns one worker thread over a duplicated socket handle.
    fn spawn_worker(
        &mut self,
        listener: &Listener,
        exit_tx: &mpsc::UnboundedSender<WorkerExit>,
    ) -> Result<(), ServerError> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let socket = listener.try_clone_socket()?;
        let tls = listener.tls().cloned();
        let dispatcher = Arc::clone(&self.dispatcher);
        let pool_size = self.config.pool_size();
        let control = self.lifecycle.subscribe();
        let exit_tx = exit_tx.clone();

        let thread = std::thread::Builder::new()
            .name(format!("canopy-worker-{id}"))
            .spawn(move || {
                let _exit_guard = WorkerExitGuard { id, tx: exit_tx };

                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::error!(
                            worker_id = id,
                            error = %err,
                            "failed to build worker runtime"
                        );
                        return;
                    }
                };

                runtime.block_on(async move {
                    match ConnectionScheduler::new(socket, tls, dispatcher, pool_size, control, id)
                    {
                        Ok(scheduler) => {
                            if let Err(err) = scheduler.run().await {
                                tracing::error!(
                                    worker_id = id,
                                    error = %err,
                                    "worker scheduler failed"
                                );
                            } else {
                                tracing::info!(worker_id = id, "worker exiting normally");
                            }
                        }
                        Err(err) => {
                            tracing::error!(
                                worker_id = id,
                                error = %err,
                                "worker could not attach to the shared socket"
                            );
                        }
                    }
                });
            })?;

        self.workers.insert(id, thread);
        tracing::info!(worker_id = id, "started worker");
        Ok(())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}
