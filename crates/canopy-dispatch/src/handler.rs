//! Handler descriptors and their collaborator traits.
//!
//! A route binds an [`Action`] to a [`HandlerDescriptor`]: a deserializer,
//! a controller, and an optional serializer. Each collaborator exposes one
//! method per action, and every per-action method defaults to the
//! collaborator's `default_action`, so a collaborator only implements the
//! actions it cares about. Dispatching an action to a collaborator is a
//! total function over the [`Action`] enum.
//!
//! # Example
//!
//! ```rust
//! use canopy_core::{Action, RequestContext, ServiceResult};
//! use canopy_dispatch::{ActionArgs, ActionOutcome, BoxedActionFuture, Controller};
//!
//! struct ClusterController;
//!
//! impl Controller for ClusterController {
//!     fn list<'a>(
//!         &'a self,
//!         _ctx: &'a RequestContext,
//!         _args: ActionArgs,
//!     ) -> BoxedActionFuture<'a> {
//!         Box::pin(async { ActionOutcome::json(serde_json::json!({"clusters": []})) })
//!     }
//!
//!     fn default_action<'a>(
//!         &'a self,
//!         action: Action,
//!         _ctx: &'a RequestContext,
//!         _args: ActionArgs,
//!     ) -> BoxedActionFuture<'a> {
//!         Box::pin(async move {
//!             Err(canopy_core::ServiceError::http(
//!                 http::StatusCode::METHOD_NOT_ALLOWED,
//!                 format!("action {action} is not supported"),
//!             ))
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use http_body_util::Full;
use serde::de::DeserializeOwned;

use canopy_core::{Action, ContentFormat, RequestContext, ServiceError, ServiceResult};

use crate::negotiate::FORMAT_OVERRIDE_PARAM;

/// Type alias for HTTP response bodies.
pub type ResponseBody = Full<Bytes>;

/// Type alias for a finished HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// Default maximum structured body size in bytes (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

/// Keyword arguments passed to an action, merged from the request body and
/// path/query-derived parameters.
pub type ActionArgs = serde_json::Map<String, serde_json::Value>;

/// What a controller action produces.
#[derive(Debug)]
pub enum ActionOutcome {
    /// A structured value to render through the response serializer.
    Value(serde_json::Value),
    /// A finished response that bypasses serialization entirely.
    ///
    /// Used for non-error responses that are already final, e.g. redirects.
    Response(HttpResponse),
}

impl ActionOutcome {
    /// Builds a value outcome from any serializable result.
    pub fn json(result: impl serde::Serialize) -> ServiceResult<Self> {
        let value = serde_json::to_value(result).map_err(ServiceError::unexpected)?;
        Ok(Self::Value(value))
    }

    /// Builds a redirect outcome pointing at `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        let response = Response::builder()
            .status(StatusCode::FOUND)
            .header(http::header::LOCATION, location)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
        Self::Response(response)
    }
}

/// Type alias for the boxed future returned by controller actions.
pub type BoxedActionFuture<'a> =
    Pin<Box<dyn Future<Output = ServiceResult<ActionOutcome>> + Send + 'a>>;

/// Business-logic collaborator of a handler descriptor.
///
/// Implement the per-action methods the controller supports; everything
/// else lands in [`Controller::default_action`].
pub trait Controller: Send + Sync {
    /// Handles the create action.
    fn create<'a>(&'a self, ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        self.default_action(Action::Create, ctx, args)
    }

    /// Handles the list action.
    fn list<'a>(&'a self, ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        self.default_action(Action::List, ctx, args)
    }

    /// Handles the show action.
    fn show<'a>(&'a self, ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        self.default_action(Action::Show, ctx, args)
    }

    /// Handles the update action.
    fn update<'a>(&'a self, ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        self.default_action(Action::Update, ctx, args)
    }

    /// Handles the delete action.
    fn delete<'a>(&'a self, ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        self.default_action(Action::Delete, ctx, args)
    }

    /// Handles any action without a specific implementation.
    fn default_action<'a>(
        &'a self,
        action: Action,
        ctx: &'a RequestContext,
        args: ActionArgs,
    ) -> BoxedActionFuture<'a>;
}

/// Invokes the controller method for `action`.
pub fn invoke_controller<'a>(
    controller: &'a dyn Controller,
    action: Action,
    ctx: &'a RequestContext,
    args: ActionArgs,
) -> BoxedActionFuture<'a> {
    match action {
        Action::Create => controller.create(ctx, args),
        Action::List => controller.list(ctx, args),
        Action::Show => controller.show(ctx, args),
        Action::Update => controller.update(ctx, args),
        Action::Delete => controller.delete(ctx, args),
    }
}

/// Request-deserializing collaborator of a handler descriptor.
///
/// Produces the argument map contributed by the request body.
pub trait RequestDeserializer: Send + Sync {
    /// Deserializes arguments for the create action.
    fn create(&self, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        self.default_action(Action::Create, ctx)
    }

    /// Deserializes arguments for the list action.
    fn list(&self, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        self.default_action(Action::List, ctx)
    }

    /// Deserializes arguments for the show action.
    fn show(&self, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        self.default_action(Action::Show, ctx)
    }

    /// Deserializes arguments for the update action.
    fn update(&self, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        self.default_action(Action::Update, ctx)
    }

    /// Deserializes arguments for the delete action.
    fn delete(&self, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        self.default_action(Action::Delete, ctx)
    }

    /// Deserializes arguments for any action without a specific method.
    fn default_action(&self, action: Action, ctx: &RequestContext) -> ServiceResult<ActionArgs>;
}

/// Invokes the deserializer method for `action`.
pub fn invoke_deserializer(
    deserializer: &dyn RequestDeserializer,
    action: Action,
    ctx: &RequestContext,
) -> ServiceResult<ActionArgs> {
    match action {
        Action::Create => deserializer.create(ctx),
        Action::List => deserializer.list(ctx),
        Action::Show => deserializer.show(ctx),
        Action::Update => deserializer.update(ctx),
        Action::Delete => deserializer.delete(ctx),
    }
}

/// A serialized response body with its media type.
#[derive(Debug, Clone)]
pub struct SerializedBody {
    /// Media type for the Content-Type header.
    pub content_type: &'static str,
    /// Rendered body bytes.
    pub bytes: Bytes,
}

/// Response-serializing collaborator of a handler descriptor.
pub trait ResponseSerializer: Send + Sync {
    /// Serializes the result of the create action.
    fn create(&self, ctx: &RequestContext, result: &serde_json::Value) -> ServiceResult<SerializedBody> {
        self.default_action(Action::Create, ctx, result)
    }

    /// Serializes the result of the list action.
    fn list(&self, ctx: &RequestContext, result: &serde_json::Value) -> ServiceResult<SerializedBody> {
        self.default_action(Action::List, ctx, result)
    }

    /// Serializes the result of the show action.
    fn show(&self, ctx: &RequestContext, result: &serde_json::Value) -> ServiceResult<SerializedBody> {
        self.default_action(Action::Show, ctx, result)
    }

    /// Serializes the result of the update action.
    fn update(&self, ctx: &RequestContext, result: &serde_json::Value) -> ServiceResult<SerializedBody> {
        self.default_action(Action::Update, ctx, result)
    }

    /// Serializes the result of the delete action.
    fn delete(&self, ctx: &RequestContext, result: &serde_json::Value) -> ServiceResult<SerializedBody> {
        self.default_action(Action::Delete, ctx, result)
    }

    /// Serializes the result of any action without a specific method.
    fn default_action(
        &self,
        action: Action,
        ctx: &RequestContext,
        result: &serde_json::Value,
    ) -> ServiceResult<SerializedBody>;
}

/// Invokes the serializer method for `action`.
pub fn invoke_serializer(
    serializer: &dyn ResponseSerializer,
    action: Action,
    ctx: &RequestContext,
    result: &serde_json::Value,
) -> ServiceResult<SerializedBody> {
    match action {
        Action::Create => serializer.create(ctx, result),
        Action::List => serializer.list(ctx, result),
        Action::Show => serializer.show(ctx, result),
        Action::Update => serializer.update(ctx, result),
        Action::Delete => serializer.delete(ctx, result),
    }
}

/// Binds a merged argument map to a controller's typed parameter struct.
///
/// A mismatch between the argument set and the accepted parameters is a
/// client error, never a 500.
pub fn bind_args<T: DeserializeOwned>(args: ActionArgs) -> ServiceResult<T> {
    serde_json::from_value(serde_json::Value::Object(args)).map_err(|err| {
        ServiceError::bad_request(format!(
            "the server could not comply with the request since it is either \
             malformed or otherwise incorrect: {err}"
        ))
    })
}

/// The deserializer/controller/serializer triple bound to a route.
#[derive(Clone)]
pub struct HandlerDescriptor {
    controller: Arc<dyn Controller>,
    deserializer: Arc<dyn RequestDeserializer>,
    serializer: Option<Arc<dyn ResponseSerializer>>,
}

impl HandlerDescriptor {
    /// Creates a descriptor with the default JSON body deserializer and no
    /// explicit serializer (one is selected from the negotiated format).
    #[must_use]
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self {
            controller,
            deserializer: Arc::new(JsonBodyDeserializer::default()),
            serializer: None,
        }
    }

    /// Replaces the deserializer.
    #[must_use]
    pub fn with_deserializer(mut self, deserializer: Arc<dyn RequestDeserializer>) -> Self {
        self.deserializer = deserializer;
        self
    }

    /// Sets an explicit serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ResponseSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Returns the controller.
    #[must_use]
    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    /// Returns the deserializer.
    #[must_use]
    pub fn deserializer(&self) -> &dyn RequestDeserializer {
        self.deserializer.as_ref()
    }

    /// Returns the explicit serializer, if one was configured.
    #[must_use]
    pub fn serializer(&self) -> Option<&dyn ResponseSerializer> {
        self.serializer.as_deref()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("serializer", &self.serializer.is_some())
            .finish_non_exhaustive()
    }
}

/// JSON body deserializer with a size cap.
///
/// Contributes a single `body` argument holding the parsed document when
/// the request carries a structured body, and nothing otherwise.
#[derive(Debug, Clone)]
pub struct JsonBodyDeserializer {
    max_body_size: usize,
}

impl JsonBodyDeserializer {
    /// Creates a deserializer with the given body size cap.
    #[must_use]
    pub const fn new(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    /// Returns whether the request carries a body this deserializer parses.
    #[must_use]
    pub fn has_body(&self, ctx: &RequestContext) -> bool {
        ctx.has_body() && is_json_request(ctx)
    }

    fn from_json(&self, body: &[u8]) -> ServiceResult<serde_json::Value> {
        if body.len() > self.max_body_size {
            return Err(ServiceError::payload_too_large(body.len(), self.max_body_size));
        }
        serde_json::from_slice(body).map_err(|err| ServiceError::bad_request(err.to_string()))
    }
}

impl Default for JsonBodyDeserializer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_SIZE)
    }
}

impl RequestDeserializer for JsonBodyDeserializer {
    fn default_action(&self, _action: Action, ctx: &RequestContext) -> ServiceResult<ActionArgs> {
        let mut args = ActionArgs::new();
        if self.has_body(ctx) {
            args.insert("body".to_string(), self.from_json(ctx.body())?);
        }
        Ok(args)
    }
}

/// Returns whether the request's declared content type is treated as JSON.
///
/// GET requests may declare the type through the legacy override query
/// parameter. Empty and `text/plain` declarations are treated as JSON for
/// backward compatibility, but only a `{`-leading body qualifies.
fn is_json_request(ctx: &RequestContext) -> bool {
    let declared = if ctx.method() == Method::GET {
        ctx.query_param(FORMAT_OVERRIDE_PARAM).or_else(|| ctx.content_type())
    } else {
        ctx.content_type()
    };

    let content_type = match declared {
        None => "application/json",
        Some(ct) if ct.is_empty() || ct.starts_with("text/plain") => "application/json",
        Some(ct) => ct,
    };

    let json_declared = content_type.eq_ignore_ascii_case("JSON")
        || ContentFormat::from_mime(content_type) == Some(ContentFormat::Json);

    json_declared && ctx.body().starts_with(b"{")
}

/// JSON response serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ResponseSerializer for JsonSerializer {
    fn default_action(
        &self,
        _action: Action,
        _ctx: &RequestContext,
        result: &serde_json::Value,
    ) -> ServiceResult<SerializedBody> {
        let bytes = serde_json::to_vec(result).map_err(ServiceError::unexpected)?;
        Ok(SerializedBody {
            content_type: ContentFormat::Json.mime(),
            bytes: Bytes::from(bytes),
        })
    }
}

/// Selects a serializer purely from the negotiated format.
#[must_use]
pub fn serializer_for(format: ContentFormat) -> Arc<dyn ResponseSerializer> {
    match format {
        ContentFormat::Json => Arc::new(JsonSerializer),
    }
}
