//! # Canopy Server
//!
//! Process-supervised serving infrastructure for the Canopy request
//! server:
//!
//! - [`Listener`] - listening socket acquisition with bind retry, keepalive
//!   and optional TLS
//! - [`ConnectionScheduler`] - bounded-concurrency accept loop per worker
//! - [`Supervisor`] - worker fleet management with respawn and
//!   signal-driven shutdown/drain
//! - [`Lifecycle`] - the explicit control channel replacing in-process
//!   signal handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use canopy_dispatch::Dispatcher;
//! use canopy_server::{ServerConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .bind_host("0.0.0.0")
//!         .bind_port(8080)
//!         .workers(4)
//!         .build();
//!
//!     let supervisor = Supervisor::new(config, dispatcher).with_os_signals();
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/canopy-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod lifecycle;
mod listener;
mod scheduler;
mod supervisor;

pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_BACKLOG, DEFAULT_BIND_HOST, DEFAULT_BIND_PORT,
    DEFAULT_POOL_SIZE, DEFAULT_WORKERS,
};
pub use error::ServerError;
pub use lifecycle::{
    ConnectionToken, ConnectionTracker, ControlSignal, Lifecycle, LifecyclePhase,
};
pub use listener::{Listener, BIND_RETRY_BUDGET, BIND_RETRY_DELAY};
pub use scheduler::ConnectionScheduler;
pub use supervisor::{Supervisor, SupervisorState};
