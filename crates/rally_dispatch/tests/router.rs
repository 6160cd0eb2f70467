use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rally_dispatch::{
    ChannelSink, ConnectionContext, Encoding, Envelope, Frame, HandlerError, Message,
    MessageRouter, Service, ServiceRegistry, ServiceRoutes,
};
use rally_kernel::{Kernel, Status, SystemConfig, SystemError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayerMoved {
    player: u32,
    x: i32,
}

impl Message for PlayerMoved {
    const SCHEMA_ID: &'static str = "arena.PlayerMoved";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ack {
    player: u32,
}

impl Message for Ack {
    const SCHEMA_ID: &'static str = "arena.Ack";
}

/// Records every move it sees and acknowledges it on the connection.
#[derive(Default)]
struct ArenaService {
    seen: Mutex<Vec<PlayerMoved>>,
    setup_config: Mutex<Option<SystemConfig>>,
    torn_down: Mutex<bool>,
}

#[async_trait]
impl Service for ArenaService {
    fn path(&self) -> &str {
        "arena.Arena"
    }

    fn routes(self: Arc<Self>, routes: &mut ServiceRoutes) {
        let arena = Arc::clone(&self);
        routes.handler::<PlayerMoved, _, _>("record", move |ctx, moved| {
            let arena = Arc::clone(&arena);
            async move {
                arena.seen.lock().unwrap().push(moved.as_ref().clone());
                ctx.emit(&[&Ack { player: moved.player }]).await?;
                Ok::<(), HandlerError>(())
            }
        });
    }

    async fn setup(&self, config: &SystemConfig) -> Result<(), SystemError> {
        *self.setup_config.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    async fn teardown(&self) -> Result<(), SystemError> {
        *self.torn_down.lock().unwrap() = true;
        Ok(())
    }
}

fn router_with(arena: Arc<ArenaService>) -> MessageRouter {
    let mut registry = ServiceRegistry::new();
    registry.register_arc(arena).unwrap();
    MessageRouter::new(registry)
}

fn connection(encoding: Encoding) -> (ConnectionContext, UnboundedReceiver<Frame>) {
    let (sink, frames) = ChannelSink::pair();
    (ConnectionContext::new(42, encoding, Arc::new(sink)), frames)
}

#[tokio::test]
async fn handler_runs_once_per_payload_in_order() {
    let arena = Arc::new(ArenaService::default());
    let router = router_with(Arc::clone(&arena));
    let (ctx, mut frames) = connection(Encoding::Json);

    let raw = br#"{"messages":[
        {"type":"arena.PlayerMoved","value":{"player":1,"x":10}},
        {"type":"arena.PlayerMoved","value":{"player":2,"x":20}}
    ]}"#;
    let summary = router.process_json_messages(&ctx, raw).await.unwrap();

    assert_eq!(summary.dispatched, 2);
    let seen = arena.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            PlayerMoved { player: 1, x: 10 },
            PlayerMoved { player: 2, x: 20 }
        ]
    );

    // One ack frame per handled message.
    assert!(matches!(frames.recv().await, Some(Frame::Text(_))));
    assert!(matches!(frames.recv().await, Some(Frame::Text(_))));
}

#[tokio::test]
async fn malformed_payload_does_not_spoil_the_batch() {
    let arena = Arc::new(ArenaService::default());
    let router = router_with(Arc::clone(&arena));
    let (ctx, _frames) = connection(Encoding::Json);

    let raw = br#"{"messages":[
        {"type":"arena.PlayerMoved","value":{"player":"not a number"}},
        {"type":"arena.PlayerMoved","value":{"player":3,"x":-1}}
    ]}"#;
    let summary = router.process_json_messages(&ctx, raw).await.unwrap();

    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(arena.seen.lock().unwrap().len(), 1);
    assert_eq!(router.stats().messages_dropped.get(), 1);
}

#[tokio::test]
async fn malformed_envelope_is_dropped() {
    let arena = Arc::new(ArenaService::default());
    let router = router_with(Arc::clone(&arena));
    let (ctx, _frames) = connection(Encoding::Json);

    assert!(router.process_json_messages(&ctx, b"{\"messages\":").await.is_err());
    assert!(router.process_binary_messages(&ctx, &[1, 2, 3]).await.is_err());
    assert_eq!(router.stats().frames_dropped.get(), 2);

    // The context is still usable afterwards.
    let raw = br#"{"messages":[{"type":"arena.PlayerMoved","value":{"player":9,"x":0}}]}"#;
    let summary = router.process_json_messages(&ctx, raw).await.unwrap();
    assert_eq!(summary.dispatched, 1);
}

#[tokio::test]
async fn unknown_schema_is_ignored() {
    let arena = Arc::new(ArenaService::default());
    let router = router_with(Arc::clone(&arena));
    let (ctx, mut frames) = connection(Encoding::Json);

    let raw = br#"{"messages":[{"type":"pkg.Unknown","value":{}}]}"#;
    let summary = router.process_json_messages(&ctx, raw).await.unwrap();

    assert_eq!(summary.unhandled, 1);
    assert_eq!(summary.dispatched, 0);
    assert!(arena.seen.lock().unwrap().is_empty());
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn binary_frames_dispatch_and_answer_in_binary() {
    let arena = Arc::new(ArenaService::default());
    let router = router_with(Arc::clone(&arena));
    let (ctx, mut frames) = connection(Encoding::Binary);

    let moved = PlayerMoved { player: 5, x: 50 };
    let raw = Envelope::pack(Encoding::Binary, &[&moved])
        .unwrap()
        .encode(Encoding::Binary)
        .unwrap();
    let summary = router.process_binary_messages(&ctx, &raw).await.unwrap();
    assert_eq!(summary.dispatched, 1);

    let Some(Frame::Binary(bytes)) = frames.recv().await else {
        panic!("expected a binary ack frame");
    };
    let envelope = Envelope::decode(Encoding::Binary, &bytes).unwrap();
    assert_eq!(envelope.payloads[0].schema, "arena.Ack");
}

#[tokio::test]
async fn router_lifecycle_runs_service_hooks_with_scoped_config() {
    let arena = Arc::new(ArenaService::default());
    let config = SystemConfig::from_toml_str(
        r#"
        [services."arena.Arena"]
        max_players = 16
        "#,
    )
    .unwrap();

    let mut kernel = Kernel::new(config);
    kernel
        .register(3, "services", router_with(Arc::clone(&arena)))
        .unwrap();

    kernel.start().await.unwrap();
    assert_eq!(kernel.status("services").unwrap(), Status::Up);
    let service_config = arena.setup_config.lock().unwrap().clone().unwrap();
    assert_eq!(service_config.get_int("max_players"), Some(16));

    kernel.stop().await.unwrap();
    assert_eq!(kernel.status("services").unwrap(), Status::Down);
    assert!(*arena.torn_down.lock().unwrap());
}

#[tokio::test]
async fn router_exports_metrics_when_attached() {
    let arena = Arc::new(ArenaService::default());
    let metrics = prometheus::Registry::new();
    let mut kernel = Kernel::default();
    kernel
        .register(3, "services", router_with(arena).with_metrics(metrics.clone()))
        .unwrap();

    kernel.start().await.unwrap();
    let names: Vec<String> = metrics
        .gather()
        .iter()
        .map(|family| family.get_name().to_string())
        .collect();
    assert!(names.contains(&"dispatch_frames_received_total".to_string()));

    kernel.stop().await.unwrap();
    assert!(metrics.gather().is_empty());
}
