//! Conversational socket surface and the group pub/sub adapter behind it.

pub mod factory;
pub mod pubsub;
pub mod websocket;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

pub use factory::AdapterFactory;
pub use pubsub::{AdapterCallbacks, AdapterOptions, PubSubAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEventKind {
    Open,
    Message,
    Error,
    Close,
}

impl SocketEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SocketEventKind::Open => "open",
            SocketEventKind::Message => "message",
            SocketEventKind::Error => "error",
            SocketEventKind::Close => "close",
        }
    }
}

impl fmt::Display for SocketEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketEventKind {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(SocketEventKind::Open),
            "message" => Ok(SocketEventKind::Message),
            "error" => Ok(SocketEventKind::Error),
            "close" => Ok(SocketEventKind::Close),
            other => Err(TransportError::UnknownEventKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    /// A serialized activity set.
    Message(String),
    Error(String),
    Close { code: Option<u16>, reason: String },
}

impl SocketEvent {
    pub fn kind(&self) -> SocketEventKind {
        match self {
            SocketEvent::Open => SocketEventKind::Open,
            SocketEvent::Message(_) => SocketEventKind::Message,
            SocketEvent::Error(_) => SocketEventKind::Error,
            SocketEvent::Close { .. } => SocketEventKind::Close,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&SocketEvent) + Send + Sync>;

/// Point-to-point socket as seen by the conversational client.
pub trait ChatSocket: Send + Sync {
    /// Sends `data` as one text frame. Empty data is ignored.
    fn send(&self, data: &str) -> TransportResult<()>;

    fn close(&self);

    fn add_event_listener(&self, kind: SocketEventKind, handler: EventHandler);

    /// Registers by event name; unknown names are logged and ignored.
    fn add_event_listener_named(&self, kind: &str, handler: EventHandler) {
        match kind.parse() {
            Ok(kind) => self.add_event_listener(kind, handler),
            Err(err) => warn!(target = "chatwire.transport", error = %err, "ignoring listener"),
        }
    }
}

/// Outbound half of a raw socket connection.
pub trait FrameSink: Send + Sync {
    fn send_text(&self, text: String) -> TransportResult<()>;
    fn close(&self);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown socket event kind: {0}")]
    UnknownEventKind(String),
    #[error("socket is not open")]
    NotOpen,
    #[error("socket is closed")]
    Closed,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid header value: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
}

pub type TransportResult<T> = Result<T, TransportError>;
