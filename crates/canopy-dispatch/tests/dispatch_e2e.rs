//! End-to-end dispatch pipeline tests.
//!
//! Drives full requests through the dispatcher and checks the externally
//! observable contract: routing, negotiation, body handling, and error
//! translation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};

use canopy_core::{Action, Catalog, RequestContext, ServiceError};
use canopy_dispatch::{
    ActionArgs, ActionOutcome, BoxedActionFuture, Controller, Dispatcher, HandlerDescriptor,
    Router,
};

/// Controller that records whether it was invoked and echoes its arguments.
struct RecordingController {
    invoked: Arc<AtomicBool>,
}

impl Controller for RecordingController {
    fn default_action<'a>(
        &'a self,
        _action: Action,
        _ctx: &'a RequestContext,
        args: ActionArgs,
    ) -> BoxedActionFuture<'a> {
        self.invoked.store(true, Ordering::SeqCst);
        Box::pin(async move { Ok(ActionOutcome::Value(serde_json::Value::Object(args))) })
    }
}

/// Controller that always raises a domain failure.
struct MissingClusterController;

impl Controller for MissingClusterController {
    fn default_action<'a>(
        &'a self,
        _action: Action,
        _ctx: &'a RequestContext,
        _args: ActionArgs,
    ) -> BoxedActionFuture<'a> {
        Box::pin(async { Err(ServiceError::not_found("cluster not found")) })
    }
}

fn recording_dispatcher(
    method: Method,
    pattern: &str,
    action: Action,
) -> (Dispatcher, Arc<AtomicBool>) {
    let invoked = Arc::new(AtomicBool::new(false));
    let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(RecordingController {
        invoked: Arc::clone(&invoked),
    })));
    let mut router = Router::new();
    router.register(method, pattern, action, descriptor);
    (Dispatcher::new(router), invoked)
}

async fn body_json(outcome: canopy_dispatch::DispatchOutcome) -> serde_json::Value {
    let body = outcome.into_response().into_body();
    let bytes = BodyExt::collect(body).await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unmatched_request_never_reaches_controller() {
    let (dispatcher, invoked) = recording_dispatcher(Method::GET, "/clusters", Action::List);

    let req = Request::builder()
        .method(Method::GET)
        .uri("/unknown")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert!(outcome.is_error());
    assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn oversize_body_never_reaches_controller() {
    let (dispatcher, invoked) =
        recording_dispatcher(Method::POST, "/clusters", Action::Create);
    let dispatcher = dispatcher.with_max_body_size(16);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/clusters")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(format!(
            "{{\"blob\":\"{}\"}}",
            "x".repeat(64)
        ))))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn malformed_json_body_is_bad_request() {
    let (dispatcher, invoked) =
        recording_dispatcher(Method::POST, "/clusters", Action::Create);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/clusters")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(b"{\"name\": oops}")))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn format_override_beats_accept_header() {
    let (dispatcher, _) = recording_dispatcher(Method::GET, "/clusters", Action::List);

    let req = Request::builder()
        .method(Method::GET)
        .uri("/clusters?ContentType=JSON")
        .header(http::header::ACCEPT, "application/xml")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::OK);
    let response = outcome.into_response();
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        "application/json"
    );
}

#[tokio::test]
async fn domain_failure_is_localized_from_accept_language() {
    let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(MissingClusterController)));
    let mut router = Router::new();
    router.register(
        Method::GET,
        "/clusters/{cluster_id}",
        Action::Show,
        descriptor,
    );
    let catalog =
        Catalog::new().with_messages("fr", [("cluster not found", "cluster introuvable")]);
    let dispatcher = Dispatcher::new(router).with_catalog(Arc::new(catalog));

    let req = Request::builder()
        .method(Method::GET)
        .uri("/clusters/c-404")
        .header(http::header::ACCEPT_LANGUAGE, "fr")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
    let body = body_json(outcome).await;
    assert_eq!(body["error"]["message"], "cluster introuvable");
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn first_registered_route_wins_through_dispatch() {
    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));

    let mut router = Router::new();
    router.register(
        Method::GET,
        "/clusters/{cluster_id}",
        Action::Show,
        Arc::new(HandlerDescriptor::new(Arc::new(RecordingController {
            invoked: Arc::clone(&first),
        }))),
    );
    router.register(
        Method::GET,
        "/clusters/{other}",
        Action::List,
        Arc::new(HandlerDescriptor::new(Arc::new(RecordingController {
            invoked: Arc::clone(&second),
        }))),
    );
    let dispatcher = Dispatcher::new(router);

    let req = Request::builder()
        .method(Method::GET)
        .uri("/clusters/c-1")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::OK);
    assert!(first.load(Ordering::SeqCst));
    assert!(!second.load(Ordering::SeqCst));
}

#[tokio::test]
async fn body_round_trips_through_deserialize_and_serialize() {
    let (dispatcher, _) = recording_dispatcher(Method::POST, "/clusters", Action::Create);

    let original = serde_json::json!({
        "name": "web",
        "size": 3,
        "tags": {"tier": "front", "env": "prod"}
    });
    let req = Request::builder()
        .method(Method::POST)
        .uri("/clusters")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(original.to_string())))
        .unwrap();
    let outcome = dispatcher.dispatch(req).await;

    assert_eq!(outcome.status(), StatusCode::OK);
    let echoed = body_json(outcome).await;
    // Mapping-key order is irrelevant; Value equality is structural.
    assert_eq!(echoed["body"], original);
}
