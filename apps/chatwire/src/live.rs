//! Live chat session: one conversation over a sequence of socket adapters.
//!
//! Adapter callbacks and listeners only post [`Signal`]s tagged with the
//! adapter's generation; everything else happens on the session loop, one
//! signal or input line at a time. Signals from a superseded adapter are
//! ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use event_hub::{ChatEvent, EventHub, Notification};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::conversation::{Conversation, Renderer};
use crate::input::{UserInput, HELP};
use crate::session::retry::Backoff;
use crate::session::{
    ConnectOutcome, SessionBackend, SessionError, SessionInfo, SpeechTokenCache,
};
use crate::transport::websocket::{self, DriverHandle};
use crate::transport::{AdapterFactory, ChatSocket, PubSubAdapter, SocketEvent, SocketEventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Opened(u64),
    Frame(u64, String),
    Error(u64, String),
    Closed(u64),
    StartConversation(u64),
    Reconnect(u64),
    InputReady(u64),
}

impl Signal {
    fn generation(&self) -> u64 {
        match self {
            Signal::Opened(generation)
            | Signal::Frame(generation, _)
            | Signal::Error(generation, _)
            | Signal::Closed(generation)
            | Signal::StartConversation(generation)
            | Signal::Reconnect(generation)
            | Signal::InputReady(generation) => *generation,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    pub user_id: Option<String>,
    pub subscription_key: Option<String>,
    pub backoff: Backoff,
}

type ReconnectAttempt =
    Pin<Box<dyn Future<Output = Result<ConnectOutcome, SessionError>> + Send>>;

struct Connection {
    adapter: PubSubAdapter,
    driver: DriverHandle,
}

pub struct LiveSession<R> {
    backend: Arc<dyn SessionBackend>,
    hub: Arc<EventHub>,
    conversation: Conversation<R>,
    speech: SpeechTokenCache,
    options: LiveOptions,
}

impl<R: Renderer> LiveSession<R> {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        hub: Arc<EventHub>,
        conversation: Conversation<R>,
        options: LiveOptions,
    ) -> Self {
        Self {
            backend,
            hub,
            conversation,
            speech: SpeechTokenCache::default(),
            options,
        }
    }

    /// Runs until the input channel closes or the user quits, then hands the
    /// conversation back.
    pub async fn run(
        mut self,
        session: Arc<SessionInfo>,
        mut input: mpsc::Receiver<UserInput>,
    ) -> Result<Conversation<R>, SessionError> {
        if let Some(credentials) = session.speech.clone() {
            self.speech.seed(credentials);
        }
        let thread = session.thread.clone();
        let (tx, mut signals) = mpsc::unbounded_channel();
        let factory = self.factory(&session, &tx);
        let mut connection = Some(open(&factory, &session.stream, &tx));
        let mut retry: Option<ReconnectAttempt> = None;
        info!(target = "chatwire.session", thread = %thread, "live session started");

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => {
                    let current = connection.as_ref().map(|c| c.adapter.generation());
                    if current != Some(signal.generation()) {
                        trace!(target = "chatwire.session", ?signal, "ignoring stale signal");
                        continue;
                    }
                    match signal {
                        Signal::Opened(_) => self.options.backoff.reset(),
                        Signal::Frame(_, text) => self.conversation.handle_frame(&text),
                        Signal::StartConversation(_) => {
                            if let Err(err) = self.backend.start_conversation(&thread).await {
                                warn!(target = "chatwire.session", error = %err, "failed to start conversation");
                            }
                        }
                        Signal::InputReady(_) => {
                            self.hub.publish(ChatEvent::Notification(Notification::info(
                                format!("connected to thread {thread}"),
                            )));
                        }
                        Signal::Error(_, message) => {
                            debug!(target = "chatwire.session", error = %message, "socket error");
                        }
                        Signal::Reconnect(_) | Signal::Closed(_) => {
                            if let Some(previous) = connection.take() {
                                previous.adapter.close();
                            }
                            factory.mark_reconnecting();
                            retry = Some(self.schedule_reconnect());
                        }
                    }
                }
                outcome = async {
                    match retry.as_mut() {
                        Some(attempt) => attempt.await,
                        None => std::future::pending().await,
                    }
                }, if retry.is_some() => {
                    retry = None;
                    match outcome {
                        Ok(ConnectOutcome::Connected(session)) => {
                            connection = Some(open(&factory, &session.stream, &tx));
                        }
                        Ok(ConnectOutcome::AuthRedirect(location)) => {
                            return Err(SessionError::LoginRequired(location));
                        }
                        Err(err) => {
                            warn!(target = "chatwire.session", error = %err, "reconnect failed");
                            retry = Some(self.schedule_reconnect());
                        }
                    }
                }
                line = input.recv() => match line {
                    None | Some(UserInput::Quit) => break,
                    Some(line) => self.handle_input(&thread, line).await,
                },
            }
        }

        if let Some(connection) = connection {
            connection.adapter.close();
            if tokio::time::timeout(Duration::from_secs(2), connection.driver.join())
                .await
                .is_err()
            {
                debug!(target = "chatwire.session", "socket driver did not stop in time");
            }
        }
        Ok(self.conversation)
    }

    fn factory(&self, session: &SessionInfo, tx: &mpsc::UnboundedSender<Signal>) -> AdapterFactory {
        let reconnects = tx.clone();
        let starts = tx.clone();
        let ready = tx.clone();
        AdapterFactory::new(
            session.thread.clone(),
            self.options.subscription_key.clone(),
            Arc::new(move |generation: u64| {
                let _ = reconnects.send(Signal::Reconnect(generation));
            }),
            Arc::new(move |generation: u64| {
                let _ = starts.send(Signal::StartConversation(generation));
            }),
        )
        .with_input_ready(Arc::new(move |generation: u64| {
            let _ = ready.send(Signal::InputReady(generation));
        }))
    }

    /// Waits out the next backoff delay, then asks the backend for a session.
    /// Runs as a `select!` branch so input keeps flowing while the service is
    /// down.
    fn schedule_reconnect(&mut self) -> ReconnectAttempt {
        let delay = self.options.backoff.next_delay();
        debug!(
            target = "chatwire.session",
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            backend.reconnect().await
        })
    }

    async fn handle_input(&mut self, thread: &str, input: UserInput) {
        match input {
            UserInput::Send(text) => {
                let activity = self
                    .conversation
                    .user_sent(&text, self.options.user_id.clone());
                if let Err(err) = self.backend.post_activity(thread, &activity).await {
                    warn!(target = "chatwire.session", error = %err, "failed to post message");
                    self.notify(Notification::error(format!("message not sent: {err}")));
                }
            }
            UserInput::MetadataLevel(level) => self.conversation.set_metadata_level(level),
            UserInput::SelectOrchestrator(name) => self.backend.select_orchestrator(&name),
            UserInput::SelectRoute(route) => self.backend.select_route(&route),
            UserInput::ListOrchestrators => match self.backend.list_orchestrators().await {
                Ok(list) => {
                    self.hub.publish(ChatEvent::OrchestratorList(list));
                }
                Err(err) => self.notify(Notification::error(format!("orchestrators unavailable: {err}"))),
            },
            UserInput::SpeechToken => match self.speech.get(self.backend.as_ref()).await {
                Ok(credentials) => self.notify(Notification::info(format!(
                    "speech token ready for region {}",
                    credentials.region
                ))),
                Err(err) => self.notify(Notification::error(format!("speech token unavailable: {err}"))),
            },
            UserInput::Help => self.notify(Notification::info(HELP)),
            UserInput::Quit => {}
        }
    }

    fn notify(&self, notification: Notification) {
        self.hub.publish(ChatEvent::Notification(notification));
    }
}

fn open(factory: &AdapterFactory, stream: &str, tx: &mpsc::UnboundedSender<Signal>) -> Connection {
    let adapter = factory.create(stream);
    let generation = adapter.generation();

    for kind in [
        SocketEventKind::Open,
        SocketEventKind::Message,
        SocketEventKind::Error,
        SocketEventKind::Close,
    ] {
        let tx = tx.clone();
        adapter.add_event_listener(
            kind,
            Arc::new(move |event: &SocketEvent| {
                let signal = match event {
                    SocketEvent::Open => Signal::Opened(generation),
                    SocketEvent::Message(text) => Signal::Frame(generation, text.clone()),
                    SocketEvent::Error(message) => Signal::Error(generation, message.clone()),
                    SocketEvent::Close { .. } => Signal::Closed(generation),
                };
                let _ = tx.send(signal);
            }),
        );
    }

    let driver = websocket::spawn(adapter.clone());
    Connection { adapter, driver }
}
