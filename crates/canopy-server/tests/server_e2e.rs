//! Full-stack server tests.
//!
//! Runs the supervisor over real sockets and drives it with raw HTTP/1.1
//! clients, covering the listener/scheduler/dispatcher chain end to end.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use canopy_core::{Action, Catalog, RequestContext, ServiceError};
use canopy_dispatch::{
    ActionArgs, ActionOutcome, BoxedActionFuture, Controller, Dispatcher, HandlerDescriptor,
    Router,
};
use canopy_server::{ControlSignal, Listener, ServerConfig, Supervisor};

struct ClusterController;

impl Controller for ClusterController {
    fn show<'a>(&'a self, _ctx: &'a RequestContext, args: ActionArgs) -> BoxedActionFuture<'a> {
        Box::pin(async move {
            match args.get("cluster_id").and_then(|v| v.as_str()) {
                Some("c-1") => ActionOutcome::json(serde_json::json!({
                    "cluster": {"id": "c-1", "status": "ACTIVE"}
                })),
                _ => Err(ServiceError::not_found("cluster not found")),
            }
        })
    }

    fn default_action<'a>(
        &'a self,
        _action: Action,
        _ctx: &'a RequestContext,
        args: ActionArgs,
    ) -> BoxedActionFuture<'a> {
        Box::pin(async move { Ok(ActionOutcome::Value(serde_json::Value::Object(args))) })
    }
}

fn build_dispatcher() -> Dispatcher {
    let descriptor = Arc::new(HandlerDescriptor::new(Arc::new(ClusterController)));
    let mut router = Router::new();
    router.register(
        http::Method::GET,
        "/clusters/{cluster_id}",
        Action::Show,
        Arc::clone(&descriptor),
    );
    router.register(http::Method::POST, "/clusters", Action::Create, descriptor);

    let catalog =
        Catalog::new().with_messages("fr", [("cluster not found", "cluster introuvable")]);
    Dispatcher::new(router).with_catalog(Arc::new(catalog))
}

fn loopback_config(workers: usize) -> ServerConfig {
    ServerConfig::builder()
        .bind_host("127.0.0.1")
        .bind_port(0)
        .workers(workers)
        .build()
}

async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn show_and_not_found_over_the_wire() {
    let supervisor = Supervisor::new(loopback_config(0), build_dispatcher());
    let lifecycle = supervisor.lifecycle().clone();
    let listener = Listener::acquire(&loopback_config(0)).unwrap();
    let addr = listener.local_addr();
    let handle = tokio::spawn(supervisor.run_with_listener(listener));

    let response = raw_request(
        addr,
        "GET /clusters/c-1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("\"id\":\"c-1\""), "got: {response}");

    let response = raw_request(
        addr,
        "GET /clusters/c-404 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");

    lifecycle.signal(ControlSignal::Shutdown);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn localized_error_over_the_wire() {
    let supervisor = Supervisor::new(loopback_config(0), build_dispatcher());
    let lifecycle = supervisor.lifecycle().clone();
    let listener = Listener::acquire(&loopback_config(0)).unwrap();
    let addr = listener.local_addr();
    let handle = tokio::spawn(supervisor.run_with_listener(listener));

    let response = raw_request(
        addr,
        "GET /clusters/c-404 HTTP/1.1\r\nHost: localhost\r\n\
         Accept-Language: fr\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
    assert!(response.contains("cluster introuvable"), "got: {response}");

    lifecycle.signal(ControlSignal::Shutdown);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn create_round_trips_body_through_workers() {
    let supervisor = Supervisor::new(loopback_config(2), build_dispatcher());
    let lifecycle = supervisor.lifecycle().clone();
    let listener = Listener::acquire(&loopback_config(2)).unwrap();
    let addr = listener.local_addr();
    let handle = tokio::spawn(supervisor.run_with_listener(listener));

    let body = r#"{"name":"web","size":3}"#;
    let request = format!(
        "POST /clusters HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let response = raw_request(addr, &request).await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("\"name\":\"web\""), "got: {response}");

    lifecycle.signal(ControlSignal::Drain);
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn keep_alive_requests_are_sequential_on_one_connection() {
    let supervisor = Supervisor::new(loopback_config(0), build_dispatcher());
    let lifecycle = supervisor.lifecycle().clone();
    let listener = Listener::acquire(&loopback_config(0)).unwrap();
    let addr = listener.local_addr();
    let handle = tokio::spawn(supervisor.run_with_listener(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for _ in 0..2 {
        stream
            .write_all(b"GET /clusters/c-1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    }
    drop(stream);

    lifecycle.signal(ControlSignal::Shutdown);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
