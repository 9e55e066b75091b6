//! Server configuration.
//!
//! All recognized options for the listener, scheduler and supervisor,
//! constructed through a builder and immutable once the server starts.

use std::path::PathBuf;
use std::time::Duration;

use canopy_dispatch::DEFAULT_MAX_BODY_SIZE;

/// Default bind host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_BIND_PORT: u16 = 8080;

/// Default listen backlog depth.
pub const DEFAULT_BACKLOG: i32 = 4096;

/// Default worker process count (0 = single-process mode).
pub const DEFAULT_WORKERS: usize = 0;

/// Default per-process connection pool size.
pub const DEFAULT_POOL_SIZE: usize = 1000;

/// Server configuration.
///
/// # Example
///
/// ```rust
/// use canopy_server::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .bind_host("127.0.0.1")
///     .bind_port(8778)
///     .workers(4)
///     .build();
///
/// assert_eq!(config.bind_addr(), "127.0.0.1:8778");
/// assert_eq!(config.workers(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    bind_host: String,

    /// Port to listen on.
    bind_port: u16,

    /// Listen backlog depth.
    backlog: i32,

    /// TLS certificate file; requires `key_file` as well.
    cert_file: Option<PathBuf>,

    /// TLS private key file; requires `cert_file` as well.
    key_file: Option<PathBuf>,

    /// Number of worker processes (0 runs a single in-process scheduler).
    workers: usize,

    /// Connection pool size per process.
    pool_size: usize,

    /// Maximum structured body size in bytes.
    max_body_size: usize,

    /// Timeout applied to controller calls delegating to long-running
    /// external operations.
    action_timeout: Option<Duration>,

    /// Verbose logging flag.
    verbose: bool,

    /// Debug logging flag (enables stack capture on unexpected failures).
    debug: bool,
}

impl ServerConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind host.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    /// Returns the bind port.
    #[must_use]
    pub const fn bind_port(&self) -> u16 {
        self.bind_port
    }

    /// Returns the `host:port` string to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Returns the listen backlog depth.
    #[must_use]
    pub const fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Returns the TLS certificate file, if configured.
    #[must_use]
    pub fn cert_file(&self) -> Option<&PathBuf> {
        self.cert_file.as_ref()
    }

    /// Returns the TLS key file, if configured.
    #[must_use]
    pub fn key_file(&self) -> Option<&PathBuf> {
        self.key_file.as_ref()
    }

    /// Returns the worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the per-process connection pool size.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the maximum structured body size in bytes.
    #[must_use]
    pub const fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Returns the action timeout, if configured.
    #[must_use]
    pub const fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout
    }

    /// Returns the verbose flag.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.verbose
    }

    /// Returns the debug flag.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    bind_host: String,
    bind_port: u16,
    backlog: i32,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    workers: usize,
    pool_size: usize,
    max_body_size: usize,
    action_timeout: Option<Duration>,
    verbose: bool,
    debug: bool,
}

impl ServerConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            backlog: DEFAULT_BACKLOG,
            cert_file: None,
            key_file: None,
            workers: DEFAULT_WORKERS,
            pool_size: DEFAULT_POOL_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            action_timeout: None,
            verbose: false,
            debug: false,
        }
    }

    /// Sets the bind host.
    #[must_use]
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub fn bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    /// Sets the listen backlog depth.
    #[must_use]
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Sets the TLS certificate file.
    #[must_use]
    pub fn cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(path.into());
        self
    }

    /// Sets the TLS key file.
    #[must_use]
    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    /// Sets the worker count (0 = single-process mode).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the per-process connection pool size.
    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the maximum structured body size in bytes.
    #[must_use]
    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Sets the action timeout.
    #[must_use]
    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = Some(timeout);
        self
    }

    /// Sets the verbose flag.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the debug flag.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            bind_host: self.bind_host,
            bind_port: self.bind_port,
            backlog: self.backlog,
            cert_file: self.cert_file,
            key_file: self.key_file,
            workers: self.workers,
            pool_size: self.pool_size,
            max_body_size: self.max_body_size,
            action_timeout: self.action_timeout,
            verbose: self.verbose,
            debug: self.debug,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
