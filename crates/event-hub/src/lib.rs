//! Typed publish/subscribe hub for chat presentation events.
//!
//! Each [`EventKind`] gets its own broadcast channel. Components subscribe when
//! they mount and drop the [`Subscription`] when they unmount;
//! publishers never need to know who is listening.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chat_proto::{MetadataLevel, Orchestrator, UserState};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Step,
    ClearProgress,
    ClearSteps,
    Sentiment,
    MetadataLevelChanged,
    OrchestratorList,
    OrchestratorSelected,
    UserStateChanged,
    ServiceStatus,
    Notification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentReading {
    pub label: String,
    pub score: Option<f64>,
}

/// Reachability of the session API as seen by the bootstrap loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Connect failed; retrying in the background.
    Unavailable,
    /// A retry succeeded; the user must refresh to start a live session.
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub duration: Duration,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            duration: Duration::from_secs(5),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Progress(String),
    Step(String),
    ClearProgress,
    ClearSteps,
    Sentiment(SentimentReading),
    MetadataLevelChanged(MetadataLevel),
    OrchestratorList(Vec<Orchestrator>),
    OrchestratorSelected(String),
    UserStateChanged(UserState),
    ServiceStatus(ServiceStatus),
    Notification(Notification),
}

impl ChatEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChatEvent::Progress(_) => EventKind::Progress,
            ChatEvent::Step(_) => EventKind::Step,
            ChatEvent::ClearProgress => EventKind::ClearProgress,
            ChatEvent::ClearSteps => EventKind::ClearSteps,
            ChatEvent::Sentiment(_) => EventKind::Sentiment,
            ChatEvent::MetadataLevelChanged(_) => EventKind::MetadataLevelChanged,
            ChatEvent::OrchestratorList(_) => EventKind::OrchestratorList,
            ChatEvent::OrchestratorSelected(_) => EventKind::OrchestratorSelected,
            ChatEvent::UserStateChanged(_) => EventKind::UserStateChanged,
            ChatEvent::ServiceStatus(_) => EventKind::ServiceStatus,
            ChatEvent::Notification(_) => EventKind::Notification,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub channel closed")]
    Closed,
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),
}

pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Default)]
pub struct EventHub {
    topics: RwLock<HashMap<EventKind, broadcast::Sender<ChatEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide hub shared by components that are not handed one explicitly.
    pub fn global() -> Arc<EventHub> {
        static GLOBAL: OnceLock<Arc<EventHub>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EventHub::new())))
    }

    fn sender_for(&self, kind: EventKind) -> broadcast::Sender<ChatEvent> {
        if let Some(sender) = self.topics.read().get(&kind) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(kind)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        Subscription {
            kind,
            rx: self.sender_for(kind).subscribe(),
        }
    }

    /// Delivers `event` to every current subscriber of its kind and returns
    /// how many there were. Publishing with nobody listening is not an error.
    pub fn publish(&self, event: ChatEvent) -> usize {
        let kind = event.kind();
        match self.sender_for(kind).send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(target = "event.hub", kind = ?kind, "no subscribers for event");
                0
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.topics
            .read()
            .get(&kind)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Runs `handler` for every event of `kind` until the returned [`Listener`]
    /// is dropped. Must be called from within a Tokio runtime.
    pub fn listen<F, Fut>(&self, kind: EventKind, mut handler: F) -> Listener
    where
        F: FnMut(ChatEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(kind);
        let handle = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(event) => handler(event).await,
                    Err(HubError::Lagged(skipped)) => {
                        warn!(target = "event.hub", kind = ?kind, skipped, "listener lagged");
                    }
                    Err(HubError::Closed) => break,
                }
            }
        });
        Listener { kind, handle }
    }
}

/// Receiving side of one event kind. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    rx: broadcast::Receiver<ChatEvent>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub async fn recv(&mut self) -> HubResult<ChatEvent> {
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(HubError::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => Err(HubError::Closed),
        }
    }

    /// Next buffered event, skipping past any lag gap.
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Handle to a spawned listener; aborts the listener task on drop.
#[derive(Debug)]
pub struct Listener {
    kind: EventKind,
    handle: JoinHandle<()>,
}

impl Listener {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
