//! Streaming connections over WebSocket.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rally_dispatch::{ChannelSink, CodecError, ConnectionContext, Encoding, Frame};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::http::TransportState;

pub(super) async fn upgrade(
    State(state): State<Arc<TransportState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let encoding = Encoding::from_content_type(&content_type);
    let shutdown = state.shutdown.subscribe();

    ws.on_upgrade(move |socket| async move {
        match encoding {
            Ok(encoding) => {
                handle_connection(state, socket, encoding, remote_addr, shutdown).await
            }
            Err(e) => reject(socket, e).await,
        }
    })
}

async fn reject(mut socket: WebSocket, error: CodecError) {
    warn!("⚠️ Rejecting WebSocket connection: {}", error);
    let _ = socket.send(WsMessage::Text(error.to_string())).await;
    let _ = socket.send(WsMessage::Close(None)).await;
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(bytes) => WsMessage::Binary(bytes),
    }
}

async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    mut close: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if ws_tx.send(to_ws(frame)).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = &mut close => {
                while let Ok(frame) = frames.try_recv() {
                    if ws_tx.send(to_ws(frame)).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}

async fn handle_connection(
    state: Arc<TransportState>,
    socket: WebSocket,
    encoding: Encoding,
    remote_addr: Option<SocketAddr>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let (ws_tx, mut ws_rx) = socket.split();
    let (sink, frames) = ChannelSink::pair();
    let sink = Arc::new(sink);
    let ctx = match remote_addr {
        Some(addr) => ConnectionContext::with_remote_addr(id, encoding, addr, sink),
        None => ConnectionContext::new(id, encoding, sink),
    };

    let (close, close_rx) = oneshot::channel();
    let writer = tokio::spawn(write_frames(ws_tx, frames, close_rx));

    state.connections.insert(id, remote_addr);
    if let Some(collectors) = &state.collectors {
        collectors.connections.inc();
    }
    info!(
        connection = id,
        "🔗 Connection opened from {} ({})",
        remote_addr.map_or_else(|| "unknown".to_string(), |a| a.to_string()),
        encoding
    );

    while !state.is_closing() {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(connection = id, "Closing connection for shutdown");
                break;
            }
            message = ws_rx.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = state.router.process_frame(&ctx, encoding, text.as_bytes()).await;
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let _ = state.router.process_frame(&ctx, encoding, &bytes).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => trace!(connection = id, "Ignoring control frame"),
                Some(Err(e)) => {
                    warn!(connection = id, "⚠️ WebSocket error: {}", e);
                    break;
                }
            }
        }
    }

    state.connections.remove(&id);
    if let Some(collectors) = &state.collectors {
        collectors.connections.dec();
    }
    drop(ctx);
    let _ = close.send(());
    if let Err(e) = writer.await {
        error!(connection = id, "❌ Writer task failed: {}", e);
    }
    info!(connection = id, "🔌 Connection closed");
}
