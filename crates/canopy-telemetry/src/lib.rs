//! # Canopy Telemetry
//!
//! Structured logging for the Canopy request server, built on the
//! tracing-subscriber ecosystem. The server and dispatcher only produce
//! log calls; storage and formatting are configured here.

#![doc(html_root_url = "https://docs.rs/canopy-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{fields, init_logging, LogConfig, TelemetryResult};
