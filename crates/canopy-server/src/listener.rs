//! Listening socket acquisition.
//!
//! Binds the one listening socket every worker shares. Binding retries on
//! address conflicts inside a fixed budget, the socket gets keepalive
//! options so dead peers are detected, and an optional certificate/key
//! pair wraps accepted connections in TLS.

use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Total time budget for bind retries.
pub const BIND_RETRY_BUDGET: Duration = Duration::from_secs(30);

/// Delay between bind attempts.
pub const BIND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Idle time before the first keepalive probe.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(600);

/// The acquired listening socket, shared by all workers.
///
/// Created exactly once; workers receive duplicated handles via
/// [`Listener::try_clone_socket`] and the kernel load-balances accepted
/// connections across them.
pub struct Listener {
    socket: StdTcpListener,
    tls: Option<TlsAcceptor>,
    addr: SocketAddr,
}

impl Listener {
    /// Acquires the listening socket described by `config`.
    ///
    /// This function blocks while retrying a conflicted address; call it
    /// before entering the async runtime or from a blocking task.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Configuration`] when only one of cert/key is set or
    ///   the bind address does not resolve
    /// - [`ServerError::BindTimeout`] when the address stays in use for the
    ///   whole retry budget
    /// - [`ServerError::Io`] for any other bind failure
    pub fn acquire(config: &ServerConfig) -> Result<Self, ServerError> {
        Self::acquire_with_budget(config, BIND_RETRY_BUDGET, BIND_RETRY_DELAY)
    }

    /// Acquires the listening socket with an explicit retry budget.
    pub fn acquire_with_budget(
        config: &ServerConfig,
        budget: Duration,
        delay: Duration,
    ) -> Result<Self, ServerError> {
        let tls = match (config.cert_file(), config.key_file()) {
            (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(ServerError::Configuration(
                    "TLS requires both cert_file and key_file to be set".to_string(),
                ))
            }
        };

        let addr = resolve_bind_addr(config)?;

        let deadline = Instant::now() + budget;
        let socket = loop {
            match bind_once(addr, config.backlog()) {
                Ok(socket) => break socket,
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                    if Instant::now() + delay >= deadline {
                        return Err(ServerError::BindTimeout {
                            addr: config.bind_addr(),
                            budget,
                        });
                    }
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(ServerError::Io(err)),
            }
        };

        socket.set_keepalive(true)?;
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;

        let socket: StdTcpListener = socket.into();
        let addr = socket.local_addr()?;
        tracing::info!(%addr, tls = tls.is_some(), "listening socket acquired");

        Ok(Self { socket, tls, addr })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Duplicates the socket handle for a worker.
    pub fn try_clone_socket(&self) -> std::io::Result<StdTcpListener> {
        self.socket.try_clone()
    }

    /// Returns the TLS acceptor, if TLS is configured.
    #[must_use]
    pub const fn tls(&self) -> Option<&TlsAcceptor> {
        self.tls.as_ref()
    }

    /// Performs a safe half-close of the shared socket.
    ///
    /// Tolerates an already-closed socket; workers blocked in accept wake
    /// with an "invalid argument" error they treat as shutdown.
    pub fn shutdown(&self) {
        let dup = match self.socket.try_clone() {
            Ok(dup) => dup,
            Err(err) => {
                tracing::debug!(error = %err, "listener already unusable during shutdown");
                return;
            }
        };
        let socket = Socket::from(dup);
        if let Err(err) = socket.shutdown(std::net::Shutdown::Both) {
            match err.kind() {
                std::io::ErrorKind::NotConnected | std::io::ErrorKind::InvalidInput => {}
                _ => tracing::debug!(error = %err, "listener shutdown reported an error"),
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Resolves the configured host/port, preferring the first v4/v6 address.
fn resolve_bind_addr(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
    let candidates = (config.bind_host(), config.bind_port())
        .to_socket_addrs()
        .map_err(|err| {
            ServerError::Configuration(format!(
                "bind address {} does not resolve: {err}",
                config.bind_addr()
            ))
        })?;

    candidates.into_iter().next().ok_or_else(|| {
        ServerError::Configuration(format!(
            "bind address {} resolved to no usable address",
            config.bind_addr()
        ))
    })
}

/// One bind attempt: socket creation, SO_REUSEADDR, bind, listen.
fn bind_once(addr: SocketAddr, backlog: i32) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket)
}

/// Loads the certificate chain and private key into a TLS acceptor.
fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ServerError> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|err| ServerError::Tls(format!("cannot open {}: {err}", cert_path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|err| ServerError::Tls(format!("invalid certificate: {err}")))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path)
        .map_err(|err| ServerError::Tls(format!("cannot open {}: {err}", key_path.display())))?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|err| ServerError::Tls(format!("invalid private key: {err}")))?
        .ok_or_else(|| {
            ServerError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| ServerError::Tls(err.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
