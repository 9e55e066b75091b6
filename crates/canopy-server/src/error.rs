//! Server error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while starting or running the server.
///
/// `Configuration` and `BindTimeout` are the only failures allowed to
/// abort the process, and only during startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid startup configuration.
    #[error("invalid server configuration: {0}")]
    Configuration(String),

    /// The listening socket could not be acquired within the retry budget.
    #[error("could not bind to {addr} after trying for {budget:?}")]
    BindTimeout {
        /// The address that could not be bound.
        addr: String,
        /// The exhausted retry budget.
        budget: Duration,
    },

    /// TLS material could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(String),

    /// I/O error during server operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
