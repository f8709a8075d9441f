use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use super::{SessionBackend, SessionError};

/// Speech service tokens are refreshed after this long.
pub const SPEECH_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpeechCredentials {
    #[serde(rename = "authorizationToken")]
    pub token: String,
    pub region: String,
}

/// Last issued speech credentials and when they were fetched.
#[derive(Debug)]
pub struct SpeechTokenCache {
    ttl: Duration,
    entry: Mutex<Option<(SpeechCredentials, Instant)>>,
}

impl Default for SpeechTokenCache {
    fn default() -> Self {
        Self::new(SPEECH_TOKEN_TTL)
    }
}

impl SpeechTokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Stores credentials handed out by connect.
    pub fn seed(&self, credentials: SpeechCredentials) {
        *self.entry.lock() = Some((credentials, Instant::now()));
    }

    pub fn cached(&self) -> Option<SpeechCredentials> {
        self.entry
            .lock()
            .as_ref()
            .filter(|(_, fetched)| fetched.elapsed() < self.ttl)
            .map(|(credentials, _)| credentials.clone())
    }

    pub async fn get<B>(&self, backend: &B) -> Result<SpeechCredentials, SessionError>
    where
        B: SessionBackend + ?Sized,
    {
        if let Some(credentials) = self.cached() {
            return Ok(credentials);
        }
        debug!(target = "chatwire.session", "refreshing speech token");
        let credentials = backend.speech_token().await?;
        self.seed(credentials.clone());
        Ok(credentials)
    }
}
