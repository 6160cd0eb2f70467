//! `rally.Ping`: liveness checks for clients and load balancers.
//!
//! The unary `Ping` method answers over HTTP. Streaming clients send a
//! `rally.PingRequest` message and receive a `rally.PingResponse` carrying
//! the same timestamp, which lets them measure round-trip latency on the
//! connection itself.

use std::sync::Arc;

use rally_dispatch::{
    ConnectionContext, HandlerError, Message, Service, ServiceError, ServiceRoutes,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub const PING_PATH: &str = "rally.Ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub timestamp: i64,
}

impl Message for PingRequest {
    const SCHEMA_ID: &'static str = "rally.PingRequest";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub timestamp: i64,
}

impl Message for PingResponse {
    const SCHEMA_ID: &'static str = "rally.PingResponse";
}

#[derive(Debug, Default)]
pub struct PingService;

impl PingService {
    pub fn new() -> Self {
        Self
    }

    pub fn ping(&self, request: PingRequest) -> PingResponse {
        PingResponse {
            timestamp: request.timestamp,
        }
    }
}

async fn pong(ctx: ConnectionContext, request: Arc<PingRequest>) -> Result<(), HandlerError> {
    trace!(connection = ctx.id(), timestamp = request.timestamp, "Ping");
    let response = PingResponse {
        timestamp: request.timestamp,
    };
    ctx.emit(&[&response]).await?;
    Ok(())
}

impl Service for PingService {
    fn path(&self) -> &str {
        PING_PATH
    }

    fn routes(self: Arc<Self>, routes: &mut ServiceRoutes) {
        let service = Arc::clone(&self);
        routes.unary("Ping", move |request: PingRequest| {
            let response = service.ping(request);
            async move { Ok::<_, ServiceError>(response) }
        });
        routes.handler("pong", pong);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rally_dispatch::{ChannelSink, Encoding, Frame, MessageRouter, ServiceRegistry};

    fn router() -> MessageRouter {
        let mut registry = ServiceRegistry::new();
        registry.register(PingService::new()).unwrap();
        MessageRouter::new(registry)
    }

    #[tokio::test]
    async fn test_unary_ping_echoes_timestamp() {
        let router = router();
        let method = router.registry().method(PING_PATH, "Ping").unwrap();

        let body = serde_json::to_vec(&PingRequest { timestamp: 42 }).unwrap();
        let response = method.invoke(Encoding::Json, &body).await.unwrap();
        let response: PingResponse = serde_json::from_slice(&response).unwrap();
        assert_eq!(response.timestamp, 42);
    }

    #[tokio::test]
    async fn test_streaming_ping_emits_response() {
        let router = router();
        let (sink, mut frames) = ChannelSink::pair();
        let ctx = ConnectionContext::new(1, Encoding::Json, Arc::new(sink));

        let raw = br#"{"messages":[{"type":"rally.PingRequest","value":{"timestamp":7}}]}"#;
        let summary = router.process_json_messages(&ctx, raw).await.unwrap();
        assert_eq!(summary.dispatched, 1);

        let Frame::Text(text) = frames.recv().await.unwrap() else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["messages"][0]["type"], "rally.PingResponse");
        assert_eq!(value["messages"][0]["value"]["timestamp"], 7);
    }
}
