use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use super::{ConnectOutcome, SessionError, SessionInfo};

type SharedAttempt = Shared<BoxFuture<'static, Result<ConnectOutcome, Arc<SessionError>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    NotConnected,
    Connecting,
    Connected,
}

enum GateState {
    NotConnected,
    Connecting(SharedAttempt),
    Connected(Arc<SessionInfo>),
}

/// Single-flight connect. Callers that arrive while an attempt is running
/// await that same attempt; once connected, the session is returned without
/// another request. A failed or redirected attempt leaves the gate
/// `NotConnected` so the next call tries again.
pub struct ConnectGate {
    state: Mutex<GateState>,
}

impl Default for ConnectGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::NotConnected),
        }
    }

    pub fn status(&self) -> ConnectStatus {
        match &*self.state.lock() {
            GateState::NotConnected => ConnectStatus::NotConnected,
            GateState::Connecting(_) => ConnectStatus::Connecting,
            GateState::Connected(_) => ConnectStatus::Connected,
        }
    }

    pub async fn connect<F, Fut>(&self, attempt: F) -> Result<ConnectOutcome, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ConnectOutcome, SessionError>> + Send + 'static,
    {
        let shared = {
            let mut state = self.state.lock();
            match &*state {
                GateState::Connected(info) => {
                    return Ok(ConnectOutcome::Connected(Arc::clone(info)));
                }
                GateState::Connecting(pending) => {
                    debug!(target = "chatwire.session", "joining in-flight connect");
                    pending.clone()
                }
                GateState::NotConnected => {
                    let pending = attempt().map(|result| result.map_err(Arc::new)).boxed().shared();
                    *state = GateState::Connecting(pending.clone());
                    pending
                }
            }
        };

        let result = shared.clone().await;
        self.settle(&shared, &result);
        result.map_err(SessionError::Shared)
    }

    fn settle(&self, attempt: &SharedAttempt, result: &Result<ConnectOutcome, Arc<SessionError>>) {
        let mut state = self.state.lock();
        let current = matches!(&*state, GateState::Connecting(pending) if pending.ptr_eq(attempt));
        if !current {
            return;
        }
        *state = match result {
            Ok(ConnectOutcome::Connected(info)) => GateState::Connected(Arc::clone(info)),
            _ => GateState::NotConnected,
        };
    }
}
