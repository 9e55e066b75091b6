//! Bounded-concurrency connection scheduling.
//!
//! One scheduler runs per worker, accepting connections on the shared
//! socket and serving each over HTTP/1.1 through the dispatcher. A
//! semaphore bounds concurrent connections; the permit is taken before
//! accepting, so excess connections queue in the OS backlog instead of
//! being rejected. Requests on one connection are served strictly
//! sequentially by the connection driver.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_rustls::TlsAcceptor;

use canopy_dispatch::Dispatcher;

use crate::error::ServerError;
use crate::lifecycle::{ConnectionTracker, LifecyclePhase};

/// Per-worker accept loop and connection pool.
pub struct ConnectionScheduler {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Semaphore>,
    tracker: ConnectionTracker,
    control: watch::Receiver<LifecyclePhase>,
    worker_id: usize,
}

impl ConnectionScheduler {
    /// Creates a scheduler over a duplicated listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket cannot be registered with the
    /// runtime.
    pub fn new(
        socket: std::net::TcpListener,
        tls: Option<TlsAcceptor>,
        dispatcher: Arc<Dispatcher>,
        pool_size: usize,
        control: watch::Receiver<LifecyclePhase>,
        worker_id: usize,
    ) -> Result<Self, ServerError> {
        socket.set_nonblocking(true)?;
        let listener = TcpListener::from_std(socket)?;
        Ok(Self {
            listener,
            tls,
            dispatcher,
            pool: Arc::new(Semaphore::new(pool_size)),
            tracker: ConnectionTracker::new(),
            control,
            worker_id,
        })
    }

    /// Returns the number of in-flight connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    /// Runs the accept loop until told to stop.
    ///
    /// On [`LifecyclePhase::Draining`] the loop stops accepting and waits
    /// for the pool to drain; on [`LifecyclePhase::Stopping`] it returns
    /// immediately, abandoning in-flight connections. Socket errors other
    /// than an invalid-argument failure from a shut-down socket are fatal.
    pub async fn run(mut self) -> Result<(), ServerError> {
        tracing::info!(worker_id = self.worker_id, "connection scheduler started");

        let exit_phase = loop {
            let phase = *self.control.borrow_and_update();
            if phase != LifecyclePhase::Running {
                break phase;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.pool).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break *self.control.borrow(),
                    }
                }
                _ = self.control.changed() => continue,
            };

            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let token = self.tracker.acquire();
                            let tls = self.tls.clone();
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let control = self.control.clone();
                            let worker_id = self.worker_id;
                            tokio::spawn(async move {
                                handle_connection(
                                    stream,
                                    remote_addr,
                                    tls,
                                    dispatcher,
                                    control,
                                    worker_id,
                                )
                                .await;
                                drop(token);
                                drop(permit);
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {
                            tracing::debug!(
                                worker_id = self.worker_id,
                                "listening socket was shut down, leaving accept loop"
                            );
                            break *self.control.borrow();
                        }
                        Err(err) => return Err(ServerError::Io(err)),
                    }
                }
                _ = self.control.changed() => {
                    drop(permit);
                }
            }
        };

        if exit_phase == LifecyclePhase::Stopping {
            tracing::info!(
                worker_id = self.worker_id,
                connections = self.tracker.active_connections(),
                "stopping immediately"
            );
        } else {
            tracing::info!(
                worker_id = self.worker_id,
                connections = self.tracker.active_connections(),
                "draining in-flight connections"
            );
            self.tracker.wait_for_drain().await;
        }

        tracing::info!(worker_id = self.worker_id, "connection scheduler exited");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionScheduler")
            .field("worker_id", &self.worker_id)
            .field("tls", &self.tls.is_some())
            .field("active", &self.tracker.active_connections())
            .finish_non_exhaustive()
    }
}

/// Serves one accepted connection, wrapping it in TLS when configured.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    control: watch::Receiver<LifecyclePhase>,
    worker_id: usize,
) {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => {
                serve_http1(TokioIo::new(stream), remote_addr, dispatcher, control, worker_id)
                    .await;
            }
            Err(err) => {
                tracing::debug!(
                    worker_id,
                    %remote_addr,
                    error = %err,
                    "TLS handshake failed"
                );
            }
        },
        None => {
            serve_http1(TokioIo::new(stream), remote_addr, dispatcher, control, worker_id).await;
        }
    }
}

/// Drives the HTTP/1.1 connection, reacting to lifecycle changes.
async fn serve_http1<I>(
    io: I,
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    mut control: watch::Receiver<LifecyclePhase>,
    worker_id: usize,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin,
{
    let service = service_fn(move |req: http::Request<Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let outcome = dispatcher.dispatch(req).await;
            Ok::<_, Infallible>(outcome.into_response())
        }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    // The phase may have moved between accept and here; a change from now
    // on is only observable through the receiver.
    match *control.borrow_and_update() {
        LifecyclePhase::Draining => conn.as_mut().graceful_shutdown(),
        LifecyclePhase::Stopping => return,
        LifecyclePhase::Running => {}
    }

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(worker_id, %remote_addr, error = %err, "connection ended with error");
                }
                return;
            }
            changed = control.changed() => {
                match changed {
                    Ok(()) => match *control.borrow_and_update() {
                        LifecyclePhase::Draining => conn.as_mut().graceful_shutdown(),
                        LifecyclePhase::Stopping => return,
                        LifecyclePhase::Running => {}
                    },
                    Err(_) => {
                        // Control channel gone; finish the current request
                        // and close.
                        conn.as_mut().graceful_shutdown();
                        if let Err(err) = conn.as_mut().await {
                            tracing::debug!(worker_id, %remote_addr, error = %err, "connection ended with error");
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ControlSignal, Lifecycle};
    use canopy_core::{Action, RequestContext};
    use canopy_dispatch::{
        ActionArgs, ActionOutcome, BoxedActionFuture, Controller, HandlerDescriptor, Router,
    };
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct SlowController {
        delay: Duration,
    }

    impl Controller for SlowController {
        fn default_action<'a>(
            &'a self,
            _action: Action,
            _ctx: &'a RequestContext,
            _args: ActionArgs,
        ) -> BoxedActionFuture<'a> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                ActionOutcome::json(serde_json::json!({"ok": true}))
            })
        }
    }

    fn dispatcher_with_delay(delay: Duration) -> Arc<Dispatcher> {
        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(SlowController { delay })));
        let mut router = Router::new();
        router.register(http::Method::GET, "/clusters", Action::List, descriptor);
        Arc::new(Dispatcher::new(router))
    }

    fn bound_socket() -> std::net::TcpListener {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap()
    }

    async fn http_get(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /clusters HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_scheduler_serves_request_and_stops() {
        let socket = bound_socket();
        let addr = socket.local_addr().unwrap();
        let lifecycle = Lifecycle::new();

        let scheduler = ConnectionScheduler::new(
            socket,
            None,
            dispatcher_with_delay(Duration::ZERO),
            16,
            lifecycle.subscribe(),
            0,
        )
        .unwrap();
        let handle = tokio::spawn(scheduler.run());

        let response = http_get(addr).await;
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");

        lifecycle.signal(ControlSignal::Shutdown);
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop promptly")
            .expect("scheduler task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_drain_completes_in_flight_request() {
        let socket = bound_socket();
        let addr = socket.local_addr().unwrap();
        let lifecycle = Lifecycle::new();

        let scheduler = ConnectionScheduler::new(
            socket,
            None,
            dispatcher_with_delay(Duration::from_millis(200)),
            16,
            lifecycle.subscribe(),
            0,
        )
        .unwrap();
        let handle = tokio::spawn(scheduler.run());

        let request = tokio::spawn(http_get(addr));

        // Let the request get accepted, then start draining.
        tokio::time::sleep(Duration::from_millis(50)).await;
        lifecycle.signal(ControlSignal::Drain);

        let response = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .expect("in-flight request should complete during drain")
            .expect("request task should not panic");
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should exit after draining")
            .expect("scheduler task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_not_found_is_served_as_response() {
        let socket = bound_socket();
        let addr = socket.local_addr().unwrap();
        let lifecycle = Lifecycle::new();

        let scheduler = ConnectionScheduler::new(
            socket,
            None,
            dispatcher_with_delay(Duration::ZERO),
            16,
            lifecycle.subscribe(),
            0,
        )
        .unwrap();
        let handle = tokio::spawn(scheduler.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");

        lifecycle.signal(ControlSignal::Shutdown);
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
