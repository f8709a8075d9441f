//! HTTP session API: connect, conversation start, message posting and the
//! auxiliary endpoints the chat client uses.

pub mod gate;
pub mod retry;
pub mod speech;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_proto::{Activity, Orchestrator, UserState};
use event_hub::{ChatEvent, EventHub};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, LOCATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use gate::{ConnectGate, ConnectStatus};
pub use speech::{SpeechCredentials, SpeechTokenCache};

/// Status the connect endpoint uses instead of a 3xx so the client can handle
/// the login redirect itself.
pub const AUTH_REDIRECT_STATUS: u16 = 299;

const SUBSCRIPTION_HEADER: &str = "subscription";
const ORCHESTRATOR_HEADER: &str = "orchestrator";
const SELECTED_ROUTE_HEADER: &str = "selected-route";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("not authorised to the api")]
    Unauthorized,
    #[error("login required at {0}")]
    LoginRequired(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Shared(Arc<SessionError>),
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    base_url: Url,
    subscription_key: Option<String>,
    redirect: String,
    thread: Option<String>,
    orchestrator: Option<String>,
    selected_route: Option<String>,
}

impl ApiConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, SessionError> {
        let mut base = base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidConfig(
                "api base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            base = format!("{}{base}", infer_scheme(&base));
        }
        // Endpoints are joined relative to the base path.
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid api url: {err}")))?;
        Ok(Self {
            redirect: parsed.to_string(),
            base_url: parsed,
            subscription_key: None,
            thread: None,
            orchestrator: None,
            selected_route: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_subscription_key(mut self, key: Option<String>) -> Self {
        self.subscription_key = key.filter(|key| !key.trim().is_empty());
        self
    }

    pub fn subscription_key(&self) -> Option<&str> {
        self.subscription_key.as_deref()
    }

    /// Where the login flow should send the user back to.
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = redirect.into();
        self
    }

    /// Thread to resume instead of starting a new one.
    pub fn with_thread(mut self, thread: Option<String>) -> Self {
        self.thread = thread.filter(|thread| !thread.is_empty());
        self
    }

    /// Orchestrator to select after connecting, listed or not.
    pub fn with_orchestrator(mut self, orchestrator: Option<String>) -> Self {
        self.orchestrator = orchestrator.filter(|name| !name.is_empty());
        self
    }

    pub fn with_selected_route(mut self, route: Option<String>) -> Self {
        self.selected_route = route.filter(|route| !route.is_empty());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url.join(path).map_err(|err| {
            SessionError::InvalidConfig(format!("invalid endpoint {path}: {err}"))
        })
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host = base
        .split('/')
        .next()
        .unwrap_or(base)
        .to_ascii_lowercase();
    if host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("0.0.0.0") {
        "http://"
    } else {
        "https://"
    }
}

/// Everything the connect endpoint tells us about the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub thread: String,
    /// Pub/sub websocket url for the thread.
    pub stream: String,
    pub user: UserState,
    pub orchestrators: Vec<Orchestrator>,
    pub selected_orchestrator: Option<String>,
    pub speech: Option<SpeechCredentials>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected(Arc<SessionInfo>),
    /// The user must log in at this location first.
    AuthRedirect(String),
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    listorchestrators: bool,
    redirect: &'a str,
    #[serde(rename = "redirectStatus")]
    redirect_status: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    #[serde(default)]
    thread: Option<String>,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    speech_key: Option<String>,
    #[serde(default)]
    speech_region: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    orchestrators: Option<Vec<Orchestrator>>,
}

/// The calls a live chat session makes against the API.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn connect(&self) -> Result<ConnectOutcome, SessionError>;

    /// Reconnecting reuses an established session when there is one.
    async fn reconnect(&self) -> Result<ConnectOutcome, SessionError> {
        self.connect().await
    }

    async fn start_conversation(&self, thread: &str) -> Result<(), SessionError>;

    async fn post_activity(&self, thread: &str, activity: &Activity) -> Result<(), SessionError>;

    async fn speech_token(&self) -> Result<SpeechCredentials, SessionError>;

    async fn list_orchestrators(&self) -> Result<Vec<Orchestrator>, SessionError>;

    fn select_orchestrator(&self, name: &str);

    fn select_route(&self, route: &str);
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    config: ApiConfig,
    http: reqwest::Client,
    hub: Arc<EventHub>,
    gate: ConnectGate,
    thread: RwLock<Option<String>>,
    orchestrator: RwLock<Option<String>>,
    selected_route: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, hub: Arc<EventHub>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(15))
            .no_proxy()
            .build()?;
        Ok(Self {
            inner: Arc::new(ApiInner {
                thread: RwLock::new(config.thread.clone()),
                orchestrator: RwLock::new(None),
                selected_route: RwLock::new(config.selected_route.clone()),
                config,
                http,
                hub,
                gate: ConnectGate::new(),
            }),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectStatus {
        self.inner.gate.status()
    }

    pub fn thread(&self) -> Option<String> {
        self.inner.thread.read().clone()
    }

    pub fn selected_orchestrator(&self) -> Option<String> {
        self.inner.orchestrator.read().clone()
    }
}

impl ApiInner {
    fn headers(&self) -> Result<HeaderMap, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let optional = [
            (SUBSCRIPTION_HEADER, self.config.subscription_key.clone()),
            (ORCHESTRATOR_HEADER, self.orchestrator.read().clone()),
            (SELECTED_ROUTE_HEADER, self.selected_route.read().clone()),
        ];
        for (name, value) in optional {
            let Some(value) = value else { continue };
            let value = HeaderValue::from_str(&value).map_err(|err| {
                SessionError::InvalidConfig(format!("invalid {name} header: {err}"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }

    async fn connect_once(self: Arc<Self>) -> Result<ConnectOutcome, SessionError> {
        let mut endpoint = self.config.endpoint("connect")?;
        if let Some(thread) = self.thread.read().clone() {
            endpoint.query_pairs_mut().append_pair("thread", &thread);
        }
        let body = ConnectRequest {
            listorchestrators: true,
            redirect: &self.config.redirect,
            redirect_status: AUTH_REDIRECT_STATUS,
        };
        let response = self
            .http
            .post(endpoint)
            .headers(self.headers()?)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == AUTH_REDIRECT_STATUS {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            return match location {
                Some(location) => {
                    info!(target = "chatwire.session", location = %location, "login required");
                    Ok(ConnectOutcome::AuthRedirect(location))
                }
                None => Err(SessionError::Unauthorized),
            };
        }
        if status != StatusCode::OK {
            return Err(SessionError::HttpStatus(status));
        }

        let payload = response.json::<ConnectResponse>().await?;
        let info = self.apply_connect(payload)?;
        Ok(ConnectOutcome::Connected(Arc::new(info)))
    }

    fn apply_connect(&self, payload: ConnectResponse) -> Result<SessionInfo, SessionError> {
        let thread = payload
            .thread
            .filter(|thread| !thread.is_empty())
            .ok_or_else(|| SessionError::InvalidResponse("connect returned no thread".into()))?;
        let stream = payload
            .stream
            .filter(|stream| !stream.is_empty())
            .ok_or_else(|| SessionError::InvalidResponse("connect returned no stream".into()))?;

        let mut orchestrators = payload.orchestrators.unwrap_or_default();
        let selected = self.config.orchestrator.clone();
        if let Some(name) = &selected {
            if !orchestrators.iter().any(|entry| &entry.name == name) {
                orchestrators.push(Orchestrator::private(name.clone()));
            }
            *self.orchestrator.write() = Some(name.clone());
        }
        *self.thread.write() = Some(thread.clone());

        let user = UserState {
            username: payload.username,
            name: payload.name,
        };
        let speech = match (payload.speech_key, payload.speech_region) {
            (Some(token), Some(region)) if !token.is_empty() => {
                Some(SpeechCredentials { token, region })
            }
            _ => None,
        };

        self.hub
            .publish(ChatEvent::OrchestratorList(orchestrators.clone()));
        if let Some(name) = &selected {
            self.hub.publish(ChatEvent::OrchestratorSelected(name.clone()));
        }
        self.hub.publish(ChatEvent::UserStateChanged(user.clone()));

        debug!(
            target = "chatwire.session",
            thread = %thread,
            orchestrators = orchestrators.len(),
            "connected"
        );
        Ok(SessionInfo {
            thread,
            stream,
            user,
            orchestrators,
            selected_orchestrator: selected,
            speech,
        })
    }

    async fn post_empty(&self, endpoint: Url) -> Result<(), SessionError> {
        let response = self
            .http
            .post(endpoint)
            .headers(self.headers()?)
            .send()
            .await?;
        ensure_success(response.status())
    }
}

fn ensure_success(status: StatusCode) -> Result<(), SessionError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SessionError::HttpStatus(status))
    }
}

#[async_trait]
impl SessionBackend for ApiClient {
    async fn connect(&self) -> Result<ConnectOutcome, SessionError> {
        let inner = Arc::clone(&self.inner);
        self.inner.gate.connect(move || inner.connect_once()).await
    }

    async fn start_conversation(&self, thread: &str) -> Result<(), SessionError> {
        let mut endpoint = self.inner.config.endpoint("webchat/conversations")?;
        endpoint.query_pairs_mut().append_pair("thread", thread);
        self.inner.post_empty(endpoint).await
    }

    async fn post_activity(&self, thread: &str, activity: &Activity) -> Result<(), SessionError> {
        let endpoint = self
            .inner
            .config
            .endpoint(&format!("webchat/conversations/{thread}/activities"))?;
        let response = self
            .inner
            .http
            .post(endpoint)
            .headers(self.inner.headers()?)
            .json(activity)
            .send()
            .await?;
        ensure_success(response.status())
    }

    async fn speech_token(&self) -> Result<SpeechCredentials, SessionError> {
        let endpoint = self.inner.config.endpoint("speechtoken")?;
        let response = self
            .inner
            .http
            .get(endpoint)
            .headers(self.inner.headers()?)
            .send()
            .await?;
        ensure_success(response.status())?;
        Ok(response.json::<SpeechCredentials>().await?)
    }

    async fn list_orchestrators(&self) -> Result<Vec<Orchestrator>, SessionError> {
        let endpoint = self.inner.config.endpoint("list-orchestrators")?;
        let response = self
            .inner
            .http
            .get(endpoint)
            .headers(self.inner.headers()?)
            .send()
            .await?;
        ensure_success(response.status())?;
        Ok(response.json::<Vec<Orchestrator>>().await?)
    }

    fn select_orchestrator(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        *self.inner.orchestrator.write() = Some(name.to_string());
        self.inner
            .hub
            .publish(ChatEvent::OrchestratorSelected(name.to_string()));
    }

    fn select_route(&self, route: &str) {
        let route = route.trim();
        if route.is_empty() {
            return;
        }
        *self.inner.selected_route.write() = Some(route.to_string());
    }
}
