//! The per-request dispatch state machine.
//!
//! [`Dispatcher::dispatch`] drives every request through the same cycle:
//! route resolution, content negotiation, body deserialization, controller
//! invocation, result serialization, and error translation. Every failure
//! raised along the way is absorbed here and converted into a final
//! response; the caller only ever sees a [`DispatchOutcome`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};

use canopy_core::{Catalog, RequestContext, ServiceError, ServiceResult};

use crate::handler::{
    invoke_controller, invoke_deserializer, invoke_serializer, serializer_for, ActionArgs,
    ActionOutcome, HttpResponse, DEFAULT_MAX_BODY_SIZE,
};
use crate::negotiate::{negotiate_format, FORMAT_OVERRIDE_PARAM};
use crate::router::{RouteMatch, Router};
use crate::translate::{error_response, translate_error};

/// Maximum accepted request-target length in bytes.
pub const URL_LENGTH_LIMIT: usize = 50_000;

/// Standard explanation for unmatched requests.
const NOT_FOUND_EXPLANATION: &str = "the resource could not be found";

/// The discriminated result of dispatching one request.
///
/// Replaces marker-exception "disguising" of already-final error responses:
/// outer layers check the variant instead of re-interpreting the response
/// as business data.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The request was handled; the response carries the handler's result.
    Success(HttpResponse),
    /// The request failed; the response is a finished, translated error.
    Error(HttpResponse),
}

impl DispatchOutcome {
    /// Returns the finished response, whichever variant it is.
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        match self {
            Self::Success(response) | Self::Error(response) => response,
        }
    }

    /// Returns `true` for the error variant.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the response status without consuming the outcome.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success(response) | Self::Error(response) => response.status(),
        }
    }
}

/// The content-negotiated request dispatcher.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use canopy_dispatch::{Dispatcher, HandlerDescriptor, Router};
/// use canopy_core::Action;
/// use http::Method;
///
/// let mut router = Router::new();
/// router.register(Method::GET, "/clusters", Action::List, descriptor);
///
/// let dispatcher = Dispatcher::new(router);
/// let outcome = dispatcher.dispatch(request).await;
/// let response = outcome.into_response();
/// ```
pub struct Dispatcher {
    router: Router,
    catalog: Arc<Catalog>,
    max_body_size: usize,
    action_timeout: Option<Duration>,
    debug: bool,
}

impl Dispatcher {
    /// Creates a dispatcher over a finished route table.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self {
            router,
            catalog: Arc::new(Catalog::new()),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            action_timeout: None,
            debug: false,
        }
    }

    /// Sets the locale catalog used for error translation.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the maximum structured body size in bytes.
    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Bounds controller calls that delegate to long-running operations.
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = Some(timeout);
        self
    }

    /// Enables verbose failure logging (stack capture on unexpected errors).
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the route table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Dispatches one request to a final response.
    pub async fn dispatch<B>(&self, req: Request<B>) -> DispatchOutcome
    where
        B: http_body::Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let target_len =
            parts.uri.path().len() + parts.uri.query().map_or(0, |query| query.len() + 1);

        let mut ctx = RequestContext::new(
            parts.method,
            parts.uri.path(),
            parts.headers,
            parts.uri.query().unwrap_or(""),
            Bytes::new(),
        );

        let format = negotiate_format(ctx.query_param(FORMAT_OVERRIDE_PARAM), ctx.accept());
        let locale = ctx
            .accept_language()
            .and_then(|header| self.catalog.best_match_language(header));
        ctx = ctx.with_format(format).with_locale(locale);

        if target_len > URL_LENGTH_LIMIT {
            return self.error_outcome(
                &ctx,
                &ServiceError::http(
                    StatusCode::URI_TOO_LONG,
                    "request target exceeds the allowed length",
                ),
            );
        }

        let Some(matched) = self.router.match_route(ctx.method(), ctx.path()) else {
            return self.error_outcome(
                &ctx,
                &ServiceError::http(StatusCode::NOT_FOUND, NOT_FOUND_EXPLANATION),
            );
        };
        ctx = ctx.with_action(matched.action());

        if let Some(declared) = declared_content_length(ctx.headers()) {
            if declared > self.max_body_size {
                return self.error_outcome(
                    &ctx,
                    &ServiceError::payload_too_large(declared, self.max_body_size),
                );
            }
        }

        let body_bytes = match collect_body(body, self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(err) => return self.error_outcome(&ctx, &err),
        };
        let ctx = ctx.with_body(body_bytes);

        match self.execute(&ctx, &matched).await {
            Ok(outcome) => outcome,
            Err(err) => self.error_outcome(&ctx, &err),
        }
    }

    /// Runs deserialization, invocation, and serialization for a matched
    /// route. Failures bubble to [`Dispatcher::error_outcome`].
    async fn execute(
        &self,
        ctx: &RequestContext,
        matched: &RouteMatch,
    ) -> ServiceResult<DispatchOutcome> {
        let action = matched.action();
        let descriptor = matched.descriptor();

        let deserialized = invoke_deserializer(descriptor.deserializer(), action, ctx)?;

        // Precedence: body fields over path params over query params.
        let mut args = ActionArgs::new();
        for (key, value) in ctx.query() {
            if key != FORMAT_OVERRIDE_PARAM {
                args.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
        for (key, value) in matched.params() {
            args.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        for (key, value) in deserialized {
            args.insert(key, value);
        }

        tracing::debug!(
            request_id = %ctx.request_id(),
            handler = %matched.pattern(),
            action = %action,
            "calling handler action"
        );

        let invocation = invoke_controller(descriptor.controller(), action, ctx, args);
        let outcome = match self.action_timeout {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .map_err(|_| {
                    ServiceError::timeout("action timed out waiting on a delegated operation")
                })??,
            None => invocation.await?,
        };

        match outcome {
            ActionOutcome::Response(response) => {
                // Already-final handler responses are not reprocessed; only
                // error statuses are reported through the error variant.
                if response.status().is_client_error() || response.status().is_server_error() {
                    Ok(DispatchOutcome::Error(response))
                } else {
                    Ok(DispatchOutcome::Success(response))
                }
            }
            ActionOutcome::Value(value) => Ok(self.serialize_or_fallback(ctx, matched, &value)),
        }
    }

    /// Serializes a successful result, falling back to the failure's own
    /// pre-built error body when serialization itself fails.
    fn serialize_or_fallback(
        &self,
        ctx: &RequestContext,
        matched: &RouteMatch,
        value: &serde_json::Value,
    ) -> DispatchOutcome {
        let action = matched.action();
        let serialized = match matched.descriptor().serializer() {
            Some(serializer) => invoke_serializer(serializer, action, ctx, value),
            None => invoke_serializer(serializer_for(ctx.format()).as_ref(), action, ctx, value),
        };

        match serialized {
            Ok(body) => DispatchOutcome::Success(build_response(
                StatusCode::OK,
                body.content_type,
                body.bytes,
            )),
            Err(err) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    "unable to serialize response, returning the failure's error body"
                );
                match serde_json::to_vec(&err.error_body()) {
                    Ok(bytes) => DispatchOutcome::Error(build_response(
                        err.status_code(),
                        ctx.format().mime(),
                        Bytes::from(bytes),
                    )),
                    Err(fallback_err) => {
                        tracing::warn!(
                            request_id = %ctx.request_id(),
                            error = %fallback_err,
                            "unable to serialize exception response"
                        );
                        DispatchOutcome::Error(build_response(
                            err.status_code(),
                            "text/plain",
                            Bytes::from(err.to_string()),
                        ))
                    }
                }
            }
        }
    }

    /// Translates a failure into a finished error response.
    fn error_outcome(&self, ctx: &RequestContext, err: &ServiceError) -> DispatchOutcome {
        self.log_failure(ctx, err);
        let translated = translate_error(err, ctx.locale(), &self.catalog);
        DispatchOutcome::Error(error_response(err, &translated, ctx.format()))
    }

    fn log_failure(&self, ctx: &RequestContext, err: &ServiceError) {
        match err {
            ServiceError::Unexpected { inner } => {
                if self.debug {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        error = ?inner,
                        "unexpected error occurred serving request"
                    );
                } else {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        error = %inner,
                        "unexpected error occurred serving request"
                    );
                }
            }
            ServiceError::Http {
                status,
                explanation,
                ..
            } if status.is_server_error() => {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    code = status.as_u16(),
                    explanation = %explanation,
                    "returning server error to user"
                );
            }
            other => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    error = %other,
                    "request failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.router.route_count())
            .field("max_body_size", &self.max_body_size)
            .field("action_timeout", &self.action_timeout)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Reads the declared Content-Length, if present and parseable.
fn declared_content_length(headers: &http::HeaderMap) -> Option<usize> {
    headers
        .get(http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Collects a request body, enforcing the size cap while reading.
async fn collect_body<B>(body: B, limit: usize) -> ServiceResult<Bytes>
where
    B: http_body::Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                Err(ServiceError::payload_too_large(limit + 1, limit))
            } else {
                Err(ServiceError::bad_request(format!(
                    "failed to read request body: {err}"
                )))
            }
        }
    }
}

/// Builds a response, falling back to an empty body on header errors.
fn build_response(status: StatusCode, content_type: &str, bytes: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(Full::new(bytes))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        BoxedActionFuture, Controller, HandlerDescriptor, ResponseSerializer, SerializedBody,
    };
    use canopy_core::Action;
    use http::Method;

    struct StaticController(serde_json::Value);

    impl Controller for StaticController {
        fn default_action<'a>(
            &'a self,
            _action: Action,
            _ctx: &'a RequestContext,
            _args: ActionArgs,
        ) -> BoxedActionFuture<'a> {
            let value = self.0.clone();
            Box::pin(async move { Ok(ActionOutcome::Value(value)) })
        }
    }

    fn single_route_dispatcher() -> Dispatcher {
        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(StaticController(
            serde_json::json!({"ok": true}),
        ))));
        let mut router = Router::new();
        router.register(Method::GET, "/clusters", Action::List, descriptor);
        Dispatcher::new(router)
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let dispatcher = single_route_dispatcher();
        let outcome = dispatcher.dispatch(get("/clusters")).await;
        assert!(!outcome.is_error());
        assert_eq!(outcome.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dispatch_not_found() {
        let dispatcher = single_route_dispatcher();
        let outcome = dispatcher.dispatch(get("/nodes")).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_uri_too_long() {
        let dispatcher = single_route_dispatcher();
        let long_query = "a".repeat(URL_LENGTH_LIMIT + 1);
        let outcome = dispatcher
            .dispatch(get(&format!("/clusters?{long_query}")))
            .await;
        assert_eq!(outcome.status(), StatusCode::URI_TOO_LONG);
    }

    #[tokio::test]
    async fn test_dispatch_declared_oversize_body() {
        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(StaticController(
            serde_json::json!({})
        ))));
        let mut router = Router::new();
        router.register(Method::POST, "/clusters", Action::Create, descriptor);
        let dispatcher = Dispatcher::new(router).with_max_body_size(16);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/clusters")
            .header(http::header::CONTENT_LENGTH, "1000")
            .body(Full::new(Bytes::from(vec![b'x'; 1000])))
            .unwrap();
        let outcome = dispatcher.dispatch(req).await;
        assert_eq!(outcome.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_dispatch_action_timeout() {
        struct SlowController;
        impl Controller for SlowController {
            fn default_action<'a>(
                &'a self,
                _action: Action,
                _ctx: &'a RequestContext,
                _args: ActionArgs,
            ) -> BoxedActionFuture<'a> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    ActionOutcome::json(serde_json::json!({}))
                })
            }
        }

        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(SlowController)));
        let mut router = Router::new();
        router.register(Method::GET, "/clusters", Action::List, descriptor);
        let dispatcher =
            Dispatcher::new(router).with_action_timeout(Duration::from_millis(10));

        let outcome = dispatcher.dispatch(get("/clusters")).await;
        assert_eq!(outcome.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_serialization_failure_falls_back_to_error_body() {
        struct FailingSerializer;
        impl ResponseSerializer for FailingSerializer {
            fn default_action(
                &self,
                _action: Action,
                _ctx: &RequestContext,
                _result: &serde_json::Value,
            ) -> ServiceResult<SerializedBody> {
                Err(ServiceError::unexpected(anyhow::anyhow!(
                    "serializer exploded"
                )))
            }
        }

        let descriptor = Arc::new(
            HandlerDescriptor::new(Arc::new(StaticController(serde_json::json!({"ok": true}))))
                .with_serializer(Arc::new(FailingSerializer)),
        );
        let mut router = Router::new();
        router.register(Method::GET, "/clusters", Action::List, descriptor);
        let dispatcher = Dispatcher::new(router);

        let outcome = dispatcher.dispatch(get("/clusters")).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = outcome.into_response().into_body();
        let collected = BodyExt::collect(body).await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&collected).unwrap();
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_redirect_passes_through_unmodified() {
        struct RedirectController;
        impl Controller for RedirectController {
            fn default_action<'a>(
                &'a self,
                _action: Action,
                _ctx: &'a RequestContext,
                _args: ActionArgs,
            ) -> BoxedActionFuture<'a> {
                Box::pin(async { Ok(ActionOutcome::redirect("/clusters/c-1")) })
            }
        }

        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(RedirectController)));
        let mut router = Router::new();
        router.register(Method::POST, "/clusters", Action::Create, descriptor);
        let dispatcher = Dispatcher::new(router);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/clusters")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let outcome = dispatcher.dispatch(req).await;
        assert!(!outcome.is_error());
        assert_eq!(outcome.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_error_status_handler_response_is_error_outcome() {
        struct TeapotController;
        impl Controller for TeapotController {
            fn default_action<'a>(
                &'a self,
                _action: Action,
                _ctx: &'a RequestContext,
                _args: ActionArgs,
            ) -> BoxedActionFuture<'a> {
                Box::pin(async {
                    Ok(ActionOutcome::Response(build_response(
                        StatusCode::IM_A_TEAPOT,
                        "application/json",
                        Bytes::from_static(b"{}"),
                    )))
                })
            }
        }

        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(TeapotController)));
        let mut router = Router::new();
        router.register(Method::GET, "/teapot", Action::Show, descriptor);
        let dispatcher = Dispatcher::new(router);

        let outcome = dispatcher.dispatch(get("/teapot")).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_args_precedence_body_over_path_over_query() {
        struct ArgsEchoController;
        impl Controller for ArgsEchoController {
            fn default_action<'a>(
                &'a self,
                _action: Action,
                _ctx: &'a RequestContext,
                args: ActionArgs,
            ) -> BoxedActionFuture<'a> {
                Box::pin(async move {
                    Ok(ActionOutcome::Value(serde_json::Value::Object(args)))
                })
            }
        }

        let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(ArgsEchoController)));
        let mut router = Router::new();
        router.register(
            Method::POST,
            "/clusters/{cluster_id}",
            Action::Update,
            descriptor,
        );
        let dispatcher = Dispatcher::new(router);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/clusters/c-1?cluster_id=from-query&limit=5")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{\"name\":\"web\"}")))
            .unwrap();
        let outcome = dispatcher.dispatch(req).await;
        assert_eq!(outcome.status(), StatusCode::OK);

        let body = outcome.into_response().into_body();
        let collected = BodyExt::collect(body).await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&collected).unwrap();
        assert_eq!(parsed["cluster_id"], "c-1");
        assert_eq!(parsed["limit"], "5");
        assert_eq!(parsed["body"]["name"], "web");
    }
}
