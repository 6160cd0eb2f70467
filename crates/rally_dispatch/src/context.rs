//! Per-connection context and outbound emission.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::codec::{Encoding, Envelope};
use crate::error::EmitError;
use crate::message::DynMessage;

/// Identifier assigned by the transport to each connection.
pub type ConnectionId = u64;

/// One outbound transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes frames to a single connection.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<(), EmitError>;
}

/// A [`FrameSink`] feeding a connection's writer task through a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Frame>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<Frame>) -> Self {
        Self { sender }
    }

    /// Creates a sink together with the receiving end of its channel.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&self, frame: Frame) -> Result<(), EmitError> {
        self.sender.send(frame).map_err(|_| EmitError::Closed)
    }
}

struct ContextInner {
    id: ConnectionId,
    encoding: Encoding,
    remote_addr: Option<SocketAddr>,
    sink: Arc<dyn FrameSink>,
}

/// Connection-scoped context handed to every streaming handler.
///
/// Cloning is cheap. The context carries the encoding negotiated when the
/// connection was opened, so [`ConnectionContext::emit`] always answers in
/// the format the client asked for.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<ContextInner>,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, encoding: Encoding, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                encoding,
                remote_addr: None,
                sink,
            }),
        }
    }

    pub fn with_remote_addr(
        id: ConnectionId,
        encoding: Encoding,
        remote_addr: SocketAddr,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                encoding,
                remote_addr: Some(remote_addr),
                sink,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        &self.inner.sink
    }

    /// Packs `messages` into a single envelope using the connection's
    /// encoding and writes it as one frame.
    pub async fn emit(&self, messages: &[&dyn DynMessage]) -> Result<(), EmitError> {
        emit_messages(self, self.encoding(), messages).await
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.inner.id)
            .field("encoding", &self.inner.encoding)
            .field("remote_addr", &self.inner.remote_addr)
            .finish()
    }
}

/// Packs `messages` into one JSON envelope and writes it as one text frame.
pub async fn emit_json_messages(
    ctx: &ConnectionContext,
    messages: &[&dyn DynMessage],
) -> Result<(), EmitError> {
    emit_messages(ctx, Encoding::Json, messages).await
}

/// Packs `messages` into one binary envelope and writes it as one binary frame.
pub async fn emit_binary_messages(
    ctx: &ConnectionContext,
    messages: &[&dyn DynMessage],
) -> Result<(), EmitError> {
    emit_messages(ctx, Encoding::Binary, messages).await
}

pub async fn emit_messages(
    ctx: &ConnectionContext,
    encoding: Encoding,
    messages: &[&dyn DynMessage],
) -> Result<(), EmitError> {
    let frame = pack_frame(encoding, messages)?;
    trace!(
        connection = ctx.id(),
        messages = messages.len(),
        bytes = frame.len(),
        "Emitting {} envelope",
        encoding
    );
    ctx.sink().send_frame(frame).await
}

/// Builds the frame that [`emit_messages`] would write.
pub fn pack_frame(encoding: Encoding, messages: &[&dyn DynMessage]) -> Result<Frame, EmitError> {
    let bytes = Envelope::pack(encoding, messages)?.encode(encoding)?;
    Ok(match encoding {
        Encoding::Json => Frame::Text(
            String::from_utf8(bytes).map_err(|e| EmitError::Codec(json_utf8_error(e)))?,
        ),
        Encoding::Binary => Frame::Binary(bytes),
    })
}

fn json_utf8_error(error: std::string::FromUtf8Error) -> crate::error::CodecError {
    crate::error::CodecError::Json(serde::de::Error::custom(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadBody;
    use crate::message::Message;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Score {
        points: u32,
    }

    impl Message for Score {
        const SCHEMA_ID: &'static str = "test.Score";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Banner {
        text: String,
    }

    impl Message for Banner {
        const SCHEMA_ID: &'static str = "test.Banner";
    }

    #[tokio::test]
    async fn test_emit_writes_one_frame_for_many_messages() {
        let (sink, mut frames) = ChannelSink::pair();
        let ctx = ConnectionContext::new(7, Encoding::Json, Arc::new(sink));

        let score = Score { points: 10 };
        let banner = Banner { text: "round over".into() };
        emit_json_messages(&ctx, &[&score, &banner]).await.unwrap();

        let frame = frames.recv().await.unwrap();
        assert!(frames.try_recv().is_err());

        let Frame::Text(text) = frame else {
            panic!("expected a text frame");
        };
        let envelope = Envelope::decode(Encoding::Json, text.as_bytes()).unwrap();
        let schemas: Vec<&str> = envelope.payloads.iter().map(|p| p.schema.as_str()).collect();
        assert_eq!(schemas, vec!["test.Score", "test.Banner"]);
    }

    #[tokio::test]
    async fn test_emit_uses_connection_encoding() {
        let (sink, mut frames) = ChannelSink::pair();
        let ctx = ConnectionContext::new(1, Encoding::Binary, Arc::new(sink));

        ctx.emit(&[&Score { points: 3 }]).await.unwrap();

        let Frame::Binary(bytes) = frames.recv().await.unwrap() else {
            panic!("expected a binary frame");
        };
        let envelope = Envelope::decode(Encoding::Binary, &bytes).unwrap();
        let PayloadBody::Binary(body) = &envelope.payloads[0].body else {
            panic!("expected binary payload");
        };
        let score: Score = bincode::deserialize(body).unwrap();
        assert_eq!(score.points, 3);
    }

    #[tokio::test]
    async fn test_emit_on_closed_connection() {
        let (sink, frames) = ChannelSink::pair();
        drop(frames);
        let ctx = ConnectionContext::new(2, Encoding::Json, Arc::new(sink));

        let err = ctx.emit(&[&Score { points: 1 }]).await.unwrap_err();
        assert!(matches!(err, EmitError::Closed));
    }
}
