use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_proto::MetadataLevel;
use chatwire::config::{default_filter, AppConfig};
use chatwire::conversation::Conversation;
use chatwire::input::{parse_line, UserInput};
use chatwire::live::{LiveOptions, LiveSession};
use chatwire::render::ConsoleRenderer;
use chatwire::session::retry::{bootstrap, Backoff, Bootstrap};
use chatwire::session::{ApiClient, ApiConfig, ConnectOutcome, SessionBackend};
use chatwire::telemetry::init_tracing;
use clap::Parser;
use event_hub::{ChatEvent, EventHub, EventKind, Listener, NotificationLevel, ServiceStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "chatwire", version, about = "Chat with an orchestrator over its pub/sub stream")]
struct Cli {
    /// Session API base url; a missing scheme is inferred from the host.
    #[arg(long)]
    api_url: Option<String>,

    /// Subscription key sent with every API call and the socket upgrade.
    #[arg(long)]
    subscription_key: Option<String>,

    /// Resume an existing conversation thread.
    #[arg(long)]
    thread: Option<String>,

    /// Orchestrator to route prompts to.
    #[arg(long)]
    orchestrator: Option<String>,

    #[arg(long)]
    selected_route: Option<String>,

    /// hidden, summary or verbose.
    #[arg(long)]
    metadata: Option<MetadataLevel>,

    /// Print final messages only, without rewriting interim lines.
    #[arg(long, default_value_t = false)]
    plain: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

impl Cli {
    fn apply(self, mut cfg: AppConfig) -> AppConfig {
        if let Some(url) = self.api_url {
            cfg.api_url = url;
        }
        cfg.subscription_key = self.subscription_key.or(cfg.subscription_key);
        cfg.thread = self.thread.or(cfg.thread);
        cfg.orchestrator = self.orchestrator.or(cfg.orchestrator);
        cfg.selected_route = self.selected_route.or(cfg.selected_route);
        if let Some(level) = self.metadata {
            cfg.metadata_level = level;
        }
        if self.debug && !cfg.debug {
            cfg.debug = true;
            if std::env::var("RUST_LOG").is_err() {
                cfg.log_filter = default_filter(true);
            }
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let plain = cli.plain;
    let cfg = cli.apply(AppConfig::from_env());
    init_tracing(&cfg.log_filter);

    let hub = EventHub::global();
    let _listeners = console_listeners(&hub);

    let mut api = ApiConfig::new(&cfg.api_url)?
        .with_subscription_key(cfg.subscription_key.clone())
        .with_thread(cfg.thread.clone())
        .with_orchestrator(cfg.orchestrator.clone())
        .with_selected_route(cfg.selected_route.clone());
    if let Some(redirect) = &cfg.redirect {
        api = api.with_redirect(redirect.clone());
    }
    let client = ApiClient::new(api, Arc::clone(&hub))?;
    let backoff = Backoff::new(
        Duration::from_millis(cfg.retry_initial_ms),
        Duration::from_millis(cfg.retry_max_ms),
    );

    info!(
        api = %cfg.api_url,
        thread = %cfg.thread.as_deref().unwrap_or("new"),
        metadata = %cfg.metadata_level,
        "starting chatwire"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let session = match bootstrap(&client, &hub, backoff.clone()).await {
        Bootstrap::Ready(session) => session,
        Bootstrap::Recovered(_) => {
            println!("service is back, press enter to start a new session");
            lines.next_line().await.context("reading stdin")?;
            match client.reconnect().await? {
                ConnectOutcome::Connected(session) => session,
                ConnectOutcome::AuthRedirect(location) => {
                    println!("login required: {location}");
                    return Ok(());
                }
            }
        }
        Bootstrap::AuthRedirect(location) => {
            println!("login required: {location}");
            return Ok(());
        }
    };

    let (input_tx, input_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    break;
                }
            };
            match parse_line(&line) {
                None => continue,
                Some(Ok(input)) => {
                    let quit = input == UserInput::Quit;
                    if input_tx.send(input).await.is_err() || quit {
                        break;
                    }
                }
                Some(Err(message)) => eprintln!("{message}"),
            }
        }
    });

    let mut renderer = ConsoleRenderer::new(std::io::stdout(), cfg.metadata_level);
    if plain {
        renderer = renderer.plain();
    }
    let conversation = Conversation::new(cfg.metadata_level, renderer, Arc::clone(&hub));
    let backend: Arc<dyn SessionBackend> = Arc::new(client);
    let live = LiveSession::new(
        backend,
        Arc::clone(&hub),
        conversation,
        LiveOptions {
            user_id: Some(cfg.user_id.clone()),
            subscription_key: cfg.subscription_key.clone(),
            backoff,
        },
    );

    let conversation = live.run(session, input_rx).await?;
    info!(cards = conversation.transcript().len(), "session ended");
    Ok(())
}

/// Prints side-channel events the transcript does not show.
fn console_listeners(hub: &EventHub) -> Vec<Listener> {
    [
        EventKind::Progress,
        EventKind::Step,
        EventKind::Notification,
        EventKind::ServiceStatus,
        EventKind::OrchestratorList,
        EventKind::OrchestratorSelected,
    ]
    .into_iter()
    .map(|kind| {
        hub.listen(kind, |event| async move {
            match event {
                ChatEvent::Progress(text) => eprintln!("… {text}"),
                ChatEvent::Step(text) => eprintln!("  step: {text}"),
                ChatEvent::Notification(note) => match note.level {
                    NotificationLevel::Info => eprintln!("{}", note.message),
                    NotificationLevel::Warn => eprintln!("warning: {}", note.message),
                    NotificationLevel::Error => eprintln!("error: {}", note.message),
                },
                ChatEvent::ServiceStatus(ServiceStatus::Unavailable) => {
                    eprintln!("service unavailable, retrying")
                }
                ChatEvent::ServiceStatus(ServiceStatus::Available) => {}
                ChatEvent::OrchestratorList(list) => {
                    for orchestrator in list {
                        let marker = if orchestrator.default { "*" } else { " " };
                        match orchestrator.description {
                            Some(description) => {
                                eprintln!("{marker} {} - {description}", orchestrator.name)
                            }
                            None => eprintln!("{marker} {}", orchestrator.name),
                        }
                    }
                }
                ChatEvent::OrchestratorSelected(name) => eprintln!("using orchestrator {name}"),
                _ => {}
            }
        })
    })
    .collect()
}
