use std::sync::Arc;
use std::time::Duration;

use event_hub::{ChatEvent, EventHub, ServiceStatus};
use tracing::{info, warn};

use super::{ConnectOutcome, SessionBackend, SessionInfo};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How the first connection was established.
#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    /// Connected on the first attempt.
    Ready(Arc<SessionInfo>),
    /// Connected after the service had been unavailable. The front end should
    /// wait for the user to refresh before going live.
    Recovered(Arc<SessionInfo>),
    /// The user has to log in first.
    AuthRedirect(String),
}

/// Connects, retrying with `backoff` until the API answers. Failures are
/// announced once as [`ServiceStatus::Unavailable`] and recovery as
/// [`ServiceStatus::Available`].
pub async fn bootstrap<B>(backend: &B, hub: &EventHub, mut backoff: Backoff) -> Bootstrap
where
    B: SessionBackend + ?Sized,
{
    let mut failing = false;
    loop {
        match backend.connect().await {
            Ok(ConnectOutcome::Connected(info)) if failing => {
                info!(target = "chatwire.session", thread = %info.thread, "api recovered");
                hub.publish(ChatEvent::ServiceStatus(ServiceStatus::Available));
                return Bootstrap::Recovered(info);
            }
            Ok(ConnectOutcome::Connected(info)) => return Bootstrap::Ready(info),
            Ok(ConnectOutcome::AuthRedirect(location)) => return Bootstrap::AuthRedirect(location),
            Err(err) => {
                if !failing {
                    failing = true;
                    hub.publish(ChatEvent::ServiceStatus(ServiceStatus::Unavailable));
                }
                let delay = backoff.next_delay();
                warn!(
                    target = "chatwire.session",
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "connect failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
