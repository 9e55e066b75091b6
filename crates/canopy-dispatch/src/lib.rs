//! # Canopy Dispatch
//!
//! Routing and content-negotiated dispatch for the Canopy request server:
//!
//! - [`Router`] - ordered first-match routing to handler descriptors
//! - [`HandlerDescriptor`] - the deserializer/controller/serializer triple
//! - [`Dispatcher`] - the per-request state machine
//! - [`DispatchOutcome`] - the discriminated success/error result
//! - [`translate_error`] - locale-aware failure translation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use canopy_core::Action;
//! use canopy_dispatch::{Dispatcher, HandlerDescriptor, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.register(
//!     Method::GET,
//!     "/clusters/{cluster_id}",
//!     Action::Show,
//!     Arc::new(HandlerDescriptor::new(controller)),
//! );
//!
//! let dispatcher = Dispatcher::new(router);
//! ```

#![doc(html_root_url = "https://docs.rs/canopy-dispatch/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod dispatcher;
mod handler;
mod negotiate;
mod router;
mod translate;

pub use dispatcher::{DispatchOutcome, Dispatcher, URL_LENGTH_LIMIT};
pub use handler::{
    bind_args, invoke_controller, invoke_deserializer, invoke_serializer, serializer_for,
    ActionArgs, ActionOutcome, BoxedActionFuture, Controller, HandlerDescriptor, HttpResponse,
    JsonBodyDeserializer, JsonSerializer, RequestDeserializer, ResponseBody, ResponseSerializer,
    SerializedBody, DEFAULT_MAX_BODY_SIZE,
};
pub use negotiate::{negotiate_format, FORMAT_OVERRIDE_PARAM};
pub use router::{RouteMatch, Router};
pub use translate::{error_response, translate_error, TranslatedError};
