//! End-to-end tests for the HTTP and WebSocket transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use game_server::systems::{MetricsSystem, HTTP};
use game_server::transport::{build_app, TransportState};
use game_server::{
    default_kernel, HttpSettings, HttpTransport, PingRequest, PingResponse, PingService,
};
use rally_dispatch::{
    Encoding, Envelope, MessageRouter, PayloadBody, Service, ServiceError, ServiceRegistry,
    ServiceRoutes, UnaryCall, UnaryError, UnaryHooks, BINARY_CONTENT_TYPE,
};
use rally_kernel::{Kernel, Status, Subsystem, SystemConfig};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const TEST_CONFIG: &str = r#"
    [logger]
    level = "debug"

    [http]
    listen = "127.0.0.1:0"
    shutdown_timeout = 2
"#;

async fn start_server() -> (Kernel, SocketAddr) {
    let config = SystemConfig::from_toml_str(TEST_CONFIG).unwrap();
    let kernel = default_kernel(config).unwrap();
    kernel.start().await.unwrap();

    let http = kernel.lookup::<HttpTransport>(HTTP).unwrap();
    let addr = http.local_addr().await.unwrap();
    (kernel, addr)
}

async fn connect(addr: SocketAddr, content_type: Option<&'static str>) -> Client {
    let mut request = format!("ws://{addr}/messages").into_client_request().unwrap();
    if let Some(content_type) = content_type {
        request
            .headers_mut()
            .insert("content-type", HeaderValue::from_static(content_type));
    }
    let (client, _) = connect_async(request).await.unwrap();
    client
}

async fn next_message(client: &mut Client) -> Option<Message> {
    timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|message| message.unwrap())
}

async fn test_app() -> axum::Router {
    app_with(PingService::new()).await
}

async fn app_with<S: Service>(service: S) -> axum::Router {
    let mut registry = ServiceRegistry::new();
    registry.register(service).unwrap();
    let router = Arc::new(MessageRouter::new(registry));
    let metrics = Arc::new(MetricsSystem::new());
    metrics
        .register_counter("test_requests_total", "Requests seen by the test")
        .unwrap()
        .inc();

    let state = Arc::new(TransportState::new(router, Some(metrics)));
    build_app(&HttpSettings::default(), state).await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_json_ping_over_websocket() {
    let (kernel, addr) = start_server().await;
    let mut client = connect(addr, None).await;

    let envelope = r#"{"messages":[
        {"type":"rally.PingRequest","value":{"timestamp":1}},
        {"type":"rally.PingRequest","value":{"timestamp":2}}
    ]}"#;
    client.send(Message::text(envelope)).await.unwrap();

    for expected in [1, 2] {
        let message = next_message(&mut client).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
        assert_eq!(value["messages"][0]["type"], "rally.PingResponse");
        assert_eq!(value["messages"][0]["value"]["timestamp"], expected);
    }

    kernel.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_ping_over_websocket() {
    let (kernel, addr) = start_server().await;
    let mut client = connect(addr, Some(BINARY_CONTENT_TYPE)).await;

    let request = PingRequest { timestamp: 99 };
    let frame = Envelope::pack(Encoding::Binary, &[&request])
        .unwrap()
        .encode(Encoding::Binary)
        .unwrap();
    client.send(Message::binary(frame)).await.unwrap();

    let message = next_message(&mut client).await.unwrap();
    assert!(message.is_binary());
    let envelope = Envelope::decode(Encoding::Binary, &message.into_data()).unwrap();
    assert_eq!(envelope.len(), 1);
    assert_eq!(envelope.payloads[0].schema, "rally.PingResponse");
    let PayloadBody::Binary(body) = &envelope.payloads[0].body else {
        panic!("expected a binary payload");
    };
    let response: PingResponse = bincode::deserialize(body).unwrap();
    assert_eq!(response.timestamp, 99);

    kernel.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_frame_keeps_connection_open() {
    let (kernel, addr) = start_server().await;
    let mut client = connect(addr, None).await;

    client.send(Message::text("not an envelope")).await.unwrap();
    client
        .send(Message::text(
            r#"{"messages":[{"type":"rally.PingRequest","value":{"timestamp":5}}]}"#,
        ))
        .await
        .unwrap();

    let message = next_message(&mut client).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
    assert_eq!(value["messages"][0]["value"]["timestamp"], 5);

    kernel.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_content_type_closes_socket() {
    let (kernel, addr) = start_server().await;
    let mut client = connect(addr, Some("text/csv")).await;

    let message = next_message(&mut client).await.unwrap();
    assert!(message.to_text().unwrap().contains("text/csv"));
    match next_message(&mut client).await {
        None | Some(Message::Close(_)) => {}
        Some(other) => panic!("expected the socket to close, got {other:?}"),
    }

    kernel.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_closes_open_connections() {
    let (kernel, addr) = start_server().await;
    let mut client = connect(addr, None).await;

    let http = kernel.lookup::<HttpTransport>(HTTP).unwrap();
    for _ in 0..100 {
        if http.connection_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(http.connection_count().await, 1);

    kernel.stop().await.unwrap();
    assert_eq!(http.status(), Status::Down);
    assert!(http.local_addr().await.is_none());

    match next_message(&mut client).await {
        None | Some(Message::Close(_)) => {}
        Some(other) => panic!("expected the socket to close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unary_ping_over_http() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rally.Ping/Ping")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"timestamp":1234}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let response: PingResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.timestamp, 1234);
}

#[tokio::test]
async fn test_unary_binary_encoding() {
    let app = test_app().await;
    let body = bincode::serialize(&PingRequest { timestamp: -3 }).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rally.Ping/Ping")
                .header(header::CONTENT_TYPE, BINARY_CONTENT_TYPE)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let response: PingResponse = bincode::deserialize(&body).unwrap();
    assert_eq!(response.timestamp, -3);
}

#[tokio::test]
async fn test_unary_error_statuses() {
    let cases = [
        ("/rally.Ping/Pong", "application/json", "{}", StatusCode::NOT_FOUND),
        ("/rally.Missing/Ping", "application/json", "{}", StatusCode::NOT_FOUND),
        ("/rally.Ping/Ping", "application/json", "{", StatusCode::BAD_REQUEST),
        (
            "/rally.Ping/Ping",
            "text/plain",
            "{}",
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ),
    ];

    for (uri, content_type, body, expected) in cases {
        let response = test_app()
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{uri} with {content_type}");
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let response = test_app()
        .await
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("rally_test_requests_total 1"));
    assert!(text.contains("rally_websocket_connections 0"));
    assert!(text.contains("rally_unary_request_duration_seconds_count 0"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_after_close_is_refused() {
    let mut registry = ServiceRegistry::new();
    registry.register(PingService::new()).unwrap();
    let state = Arc::new(TransportState::new(
        Arc::new(MessageRouter::new(registry)),
        None,
    ));
    let app = build_app(&HttpSettings::default(), Arc::clone(&state)).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    });

    state.close_connections();
    let mut client = connect(addr, None).await;
    match next_message(&mut client).await {
        None | Some(Message::Close(_)) => {}
        Some(other) => panic!("expected the socket to close, got {other:?}"),
    }
    assert_eq!(state.connection_count(), 0);
}

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    sent: AtomicUsize,
    failed: AtomicUsize,
}

struct Counting(Arc<Counters>);

impl UnaryHooks for Counting {
    fn request_received(&self, _call: &UnaryCall<'_>) {
        self.0.received.fetch_add(1, Ordering::SeqCst);
    }

    fn response_sent(&self, _call: &UnaryCall<'_>) {
        self.0.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn error(&self, _call: &UnaryCall<'_>, _error: &UnaryError) {
        self.0.failed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Clock {
    counters: Arc<Counters>,
}

impl Service for Clock {
    fn path(&self) -> &str {
        "test.Clock"
    }

    fn routes(self: Arc<Self>, routes: &mut ServiceRoutes) {
        routes
            .unary("Now", |req: PingRequest| async move {
                if req.timestamp < 0 {
                    return Err(ServiceError::Unavailable("clock is stopped".into()));
                }
                Ok(PingResponse {
                    timestamp: req.timestamp + 1,
                })
            })
            .hooks(Counting(Arc::clone(&self.counters)));
    }
}

#[tokio::test]
async fn test_unary_hooks_run_around_http_calls() {
    let counters = Arc::new(Counters::default());
    let cases = [
        ("/test.Clock/Now", r#"{"timestamp":1}"#, StatusCode::OK),
        ("/test.Clock/Now", r#"{"timestamp":-1}"#, StatusCode::SERVICE_UNAVAILABLE),
        ("/test.Clock/Later", "{}", StatusCode::NOT_FOUND),
    ];

    for (uri, body, expected) in cases {
        let app = app_with(Clock {
            counters: Arc::clone(&counters),
        })
        .await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{uri} with {body}");
    }

    assert_eq!(counters.received.load(Ordering::SeqCst), 3);
    assert_eq!(counters.sent.load(Ordering::SeqCst), 1);
    assert_eq!(counters.failed.load(Ordering::SeqCst), 2);
}
