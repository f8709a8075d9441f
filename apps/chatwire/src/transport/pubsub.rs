//! Group pub/sub socket presented as a conversational socket.
//!
//! The raw connection is owned by the websocket driver task, which calls the
//! `dispatch_*` methods one event at a time. The adapter joins its group when
//! the connection opens, drops frames addressed to other groups and rewrites
//! group payloads into activity sets before handing them to listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chat_proto::envelope::repackage;
use chat_proto::{now_millis, ControlFrame, GroupEnvelope};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::{
    ChatSocket, EventHandler, FrameSink, SocketEvent, SocketEventKind, TransportError,
    TransportResult,
};

pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub url: String,
    /// Group to join; the conversation thread id.
    pub group: String,
    pub subscription_key: Option<String>,
}

#[derive(Clone)]
pub struct AdapterCallbacks {
    pub on_reconnect: Callback,
    pub on_start_conversation: Callback,
    /// Runs after every open, e.g. to give focus back to the input line.
    pub on_input_ready: Option<Callback>,
}

impl AdapterCallbacks {
    pub fn new(on_reconnect: Callback, on_start_conversation: Callback) -> Self {
        Self {
            on_reconnect,
            on_start_conversation,
            on_input_ready: None,
        }
    }

    pub fn with_input_ready(mut self, hook: Callback) -> Self {
        self.on_input_ready = Some(hook);
        self
    }
}

#[derive(Clone)]
pub struct PubSubAdapter {
    inner: Arc<Inner>,
}

struct Inner {
    options: AdapterOptions,
    generation: u64,
    callbacks: AdapterCallbacks,
    reconnecting: Arc<AtomicBool>,
    /// Set once the conversation has been started; shared by every adapter of
    /// one session.
    started: Arc<AtomicBool>,
    open: AtomicBool,
    closed: AtomicBool,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    listeners: RwLock<HashMap<SocketEventKind, Vec<EventHandler>>>,
}

impl PubSubAdapter {
    pub fn new(options: AdapterOptions, callbacks: AdapterCallbacks) -> Self {
        Self::with_state(
            options,
            callbacks,
            0,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    pub(crate) fn with_state(
        options: AdapterOptions,
        callbacks: AdapterCallbacks,
        generation: u64,
        reconnecting: Arc<AtomicBool>,
        started: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                generation,
                callbacks,
                reconnecting,
                started,
                open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                sink: Mutex::new(None),
                listeners: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.options.url
    }

    pub fn group(&self) -> &str {
        &self.inner.options.group
    }

    pub fn subscription_key(&self) -> Option<&str> {
        self.inner.options.subscription_key.as_deref()
    }

    /// Position of this adapter in its factory's sequence.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_reconnect(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    /// True once `close` has been called locally.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Hands the adapter the outbound half of its connection.
    pub fn attach(&self, sink: Arc<dyn FrameSink>) {
        *self.inner.sink.lock() = Some(sink);
    }

    pub fn dispatch_open(&self) {
        self.inner.open.store(true, Ordering::SeqCst);

        let frame = ControlFrame::join_group(self.group(), next_ack_id());
        let joined = serde_json::to_string(&frame)
            .map_err(TransportError::from)
            .and_then(|text| self.send_raw(text));
        match joined {
            Ok(()) => debug!(target = "chatwire.transport", group = %self.group(), "join requested"),
            Err(err) => warn!(
                target = "chatwire.transport",
                group = %self.group(),
                error = %err,
                "failed to send join frame"
            ),
        }

        self.emit(&SocketEvent::Open);

        if !self.is_reconnect() && !self.inner.started.swap(true, Ordering::SeqCst) {
            (self.inner.callbacks.on_start_conversation)();
        }
        if let Some(hook) = &self.inner.callbacks.on_input_ready {
            hook();
        }
    }

    pub fn dispatch_frame(&self, text: &str) {
        if !self.has_listeners(SocketEventKind::Message) {
            return;
        }
        let envelope = match GroupEnvelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    target = "chatwire.transport",
                    error = %err,
                    "ignoring unparseable frame"
                );
                return;
            }
        };
        let Some(data) = envelope.into_group_payload(self.group()) else {
            trace!(target = "chatwire.transport", "frame not addressed to group");
            return;
        };
        match serde_json::to_string(&repackage(data, now_millis())) {
            Ok(payload) => self.emit(&SocketEvent::Message(payload)),
            Err(err) => warn!(
                target = "chatwire.transport",
                error = %err,
                "failed to serialize activity set"
            ),
        }
    }

    pub fn dispatch_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(
            target = "chatwire.transport",
            group = %self.group(),
            error = %message,
            "socket error, requesting reconnect"
        );
        self.inner.open.store(false, Ordering::SeqCst);
        // A session that never opened has nothing to resume.
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.reconnecting.store(true, Ordering::SeqCst);
        }
        (self.inner.callbacks.on_reconnect)();
        self.emit(&SocketEvent::Error(message));
    }

    pub fn dispatch_close(&self, code: Option<u16>, reason: impl Into<String>) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.emit(&SocketEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    fn send_raw(&self, text: String) -> TransportResult<()> {
        let sink = self.inner.sink.lock().clone();
        match sink {
            Some(sink) => sink.send_text(text),
            None => Err(TransportError::NotOpen),
        }
    }

    fn has_listeners(&self, kind: SocketEventKind) -> bool {
        self.inner
            .listeners
            .read()
            .get(&kind)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    fn emit(&self, event: &SocketEvent) {
        let handlers = self
            .inner
            .listeners
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }
}

impl ChatSocket for PubSubAdapter {
    fn send(&self, data: &str) -> TransportResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.send_raw(data.to_string())
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.open.store(false, Ordering::SeqCst);
        if let Some(sink) = self.inner.sink.lock().take() {
            sink.close();
        }
    }

    fn add_event_listener(&self, kind: SocketEventKind, handler: EventHandler) {
        self.inner
            .listeners
            .write()
            .entry(kind)
            .or_default()
            .push(handler);
    }
}

/// Millisecond timestamp, bumped when needed so every value is unique.
fn next_ack_id() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = now_millis();
    let mut previous = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(previous + 1);
        match LAST.compare_exchange_weak(previous, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => previous = actual,
        }
    }
}
