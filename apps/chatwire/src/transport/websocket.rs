//! Websocket driver for [`PubSubAdapter`].
//!
//! One task per adapter owns the socket: it opens the connection with the
//! pub/sub sub-protocol, forwards outbound frames queued by the adapter and
//! dispatches inbound events back into it in arrival order.

use std::sync::Arc;

use chat_proto::PUBSUB_SUBPROTOCOL;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::pubsub::PubSubAdapter;
use super::{FrameSink, TransportError, TransportResult};

const SUBSCRIPTION_HEADER: &str = "subscription";

enum Outbound {
    Text(String),
    Close,
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink for ChannelSink {
    fn send_text(&self, text: String) -> TransportResult<()> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Handle to a running driver task. Dropping it leaves the task running;
/// close the adapter to end it.
#[derive(Debug)]
pub struct DriverHandle {
    task: JoinHandle<()>,
}

impl DriverHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Connects `adapter` to its url on a new task.
pub fn spawn(adapter: PubSubAdapter) -> DriverHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    adapter.attach(Arc::new(ChannelSink { tx }));
    let task = tokio::spawn(run(adapter, rx));
    DriverHandle { task }
}

pub(crate) fn build_request(adapter: &PubSubAdapter) -> TransportResult<Request> {
    let mut request = adapter.url().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(PUBSUB_SUBPROTOCOL),
    );
    if let Some(key) = adapter.subscription_key() {
        headers.insert(SUBSCRIPTION_HEADER, HeaderValue::from_str(key)?);
    }
    Ok(request)
}

async fn run(adapter: PubSubAdapter, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let request = match build_request(&adapter) {
        Ok(request) => request,
        Err(err) => {
            adapter.dispatch_error(err.to_string());
            return;
        }
    };

    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            adapter.dispatch_error(err.to_string());
            return;
        }
    };
    debug!(
        target = "chatwire.transport",
        generation = adapter.generation(),
        "websocket connected"
    );

    let (mut ws_tx, mut ws_rx) = stream.split();
    adapter.dispatch_open();

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = ws_tx.send(Message::Text(text)).await {
                        adapter.dispatch_error(err.to_string());
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = ws_tx.send(Message::Close(None)).await {
                        debug!(target = "chatwire.transport", error = %err, "close frame not sent");
                    }
                    adapter.dispatch_close(None, "closed locally");
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => adapter.dispatch_frame(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => adapter.dispatch_frame(&text),
                    Err(err) => warn!(
                        target = "chatwire.transport",
                        error = %err,
                        "ignoring non-utf8 binary frame"
                    ),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (Some(u16::from(frame.code)), frame.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    adapter.dispatch_close(code, reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    adapter.dispatch_error(err.to_string());
                    break;
                }
                None => {
                    adapter.dispatch_close(None, String::new());
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pubsub::{AdapterCallbacks, AdapterOptions};

    #[test]
    fn upgrade_request_carries_subprotocol_and_subscription() {
        let adapter = PubSubAdapter::new(
            AdapterOptions {
                url: "ws://localhost:9000/client/hubs/chat".into(),
                group: "T1".into(),
                subscription_key: Some("sub-key".into()),
            },
            AdapterCallbacks::new(Arc::new(|| {}), Arc::new(|| {})),
        );
        let request = build_request(&adapter).expect("request");
        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).and_then(|v| v.to_str().ok()),
            Some(PUBSUB_SUBPROTOCOL)
        );
        assert_eq!(
            request.headers().get(SUBSCRIPTION_HEADER).and_then(|v| v.to_str().ok()),
            Some("sub-key")
        );
    }
}
