//! # Canopy
//!
//! **Process-supervised HTTP request server with a content-negotiated
//! dispatch pipeline.**
//!
//! Canopy accepts inbound connections, distributes them across supervised
//! workers sharing one listening socket, routes each request to a
//! registered handler descriptor, negotiates request/response encoding,
//! and translates internal failures into well-formed, localized protocol
//! error responses.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use canopy::prelude::*;
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     canopy::telemetry::init_logging(&canopy::telemetry::LogConfig::default())?;
//!
//!     let mut router = Router::new();
//!     router.register(
//!         Method::GET,
//!         "/clusters/{cluster_id}",
//!         Action::Show,
//!         Arc::new(HandlerDescriptor::new(Arc::new(ClusterController))),
//!     );
//!
//!     let config = ServerConfig::builder()
//!         .bind_host("0.0.0.0")
//!         .bind_port(8080)
//!         .workers(4)
//!         .build();
//!
//!     let supervisor = Supervisor::new(config, Dispatcher::new(router)).with_os_signals();
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Listener ──► Supervisor ──► worker: Scheduler ──► Router ──► Dispatcher
//!                 │                                                │
//!                 └── Shutdown / Drain control channel             └── Error Translator
//! ```

#![doc(html_root_url = "https://docs.rs/canopy/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use canopy_core as core;

// Re-export the dispatch pipeline
pub use canopy_dispatch as dispatch;

// Re-export the serving infrastructure
pub use canopy_server as server;

// Re-export telemetry setup
pub use canopy_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use canopy::prelude::*;
/// ```
pub mod prelude {
    pub use canopy_core::{
        Action, Catalog, ContentFormat, ErrorCategory, RequestContext, RequestId, ServiceError,
        ServiceResult,
    };

    pub use canopy_dispatch::{
        bind_args, ActionArgs, ActionOutcome, BoxedActionFuture, Controller, DispatchOutcome,
        Dispatcher, HandlerDescriptor, JsonBodyDeserializer, JsonSerializer, RequestDeserializer,
        ResponseSerializer, RouteMatch, Router,
    };

    pub use canopy_server::{
        ConnectionScheduler, ControlSignal, Lifecycle, LifecyclePhase, Listener, ServerConfig,
        ServerError, Supervisor, SupervisorState,
    };

    pub use canopy_telemetry::{init_logging, LogConfig};
}
