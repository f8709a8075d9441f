use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header::LOCATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_proto::{Activity, Orchestrator};
use chatwire::session::{ApiClient, ApiConfig, ConnectOutcome, SessionBackend, SessionError};
use event_hub::EventHub;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Copy)]
enum ConnectMode {
    Ok,
    Redirect,
    RedirectWithoutLocation,
}

struct MockApi {
    mode: ConnectMode,
    connect_hits: AtomicUsize,
    connect_bodies: Mutex<Vec<Value>>,
    started: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, Value, Option<String>)>>,
}

impl MockApi {
    fn new(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            connect_hits: AtomicUsize::new(0),
            connect_bodies: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        })
    }
}

#[derive(Deserialize)]
struct ThreadQuery {
    thread: Option<String>,
}

async fn connect(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Response {
    api.connect_hits.fetch_add(1, Ordering::SeqCst);
    api.connect_bodies.lock().push(body);
    // Keep the request open long enough for callers to overlap.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let redirect = StatusCode::from_u16(299).expect("status");
    match api.mode {
        ConnectMode::Ok => Json(json!({
            "thread": "T-100",
            "stream": "ws://127.0.0.1:1/client/hubs/chat",
            "speechKey": "speech-token",
            "speechRegion": "westeurope",
            "username": "jdoe",
            "orchestrators": [{ "name": "default", "default": true }]
        }))
        .into_response(),
        ConnectMode::Redirect => {
            (redirect, [(LOCATION, "https://login.example.com/")]).into_response()
        }
        ConnectMode::RedirectWithoutLocation => redirect.into_response(),
    }
}

async fn start_conversation(
    State(api): State<Arc<MockApi>>,
    Query(query): Query<ThreadQuery>,
) -> StatusCode {
    api.started.lock().push(query.thread.unwrap_or_default());
    StatusCode::OK
}

async fn post_activity(
    State(api): State<Arc<MockApi>>,
    Path(thread): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let route = headers
        .get("selected-route")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    api.posted.lock().push((thread, body, route));
    StatusCode::OK
}

async fn list_orchestrators() -> Json<Value> {
    Json(json!([{ "name": "default", "default": true }, { "name": "recipes" }]))
}

async fn speech_token() -> Json<Value> {
    Json(json!({ "authorizationToken": "fresh", "region": "northeurope" }))
}

async fn serve(api: Arc<MockApi>) -> SocketAddr {
    let app = Router::new()
        .route("/api/connect", post(connect))
        .route("/api/webchat/conversations", post(start_conversation))
        .route(
            "/api/webchat/conversations/:thread/activities",
            post(post_activity),
        )
        .route("/api/list-orchestrators", get(list_orchestrators))
        .route("/api/speechtoken", get(speech_token))
        .with_state(api);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn client(addr: SocketAddr) -> ApiClient {
    let config = ApiConfig::new(format!("http://{addr}/api")).expect("config");
    ApiClient::new(config, Arc::new(EventHub::new())).expect("client")
}

#[tokio::test]
async fn concurrent_connects_issue_one_request() {
    let api = MockApi::new(ConnectMode::Ok);
    let client = client(serve(Arc::clone(&api)).await);

    let (first, second) = tokio::join!(client.connect(), client.connect());
    let first = first.expect("first connect");
    let second = second.expect("second connect");
    assert_eq!(first, second);
    assert_eq!(api.connect_hits.load(Ordering::SeqCst), 1);

    let ConnectOutcome::Connected(info) = first else {
        panic!("expected a session");
    };
    assert_eq!(info.thread, "T-100");
    assert_eq!(info.stream, "ws://127.0.0.1:1/client/hubs/chat");
    assert_eq!(info.user.username.as_deref(), Some("jdoe"));
    assert_eq!(info.speech.as_ref().map(|s| s.token.as_str()), Some("speech-token"));

    let again = client.reconnect().await.expect("reconnect");
    assert_eq!(again, ConnectOutcome::Connected(info));
    assert_eq!(api.connect_hits.load(Ordering::SeqCst), 1);

    let body = api.connect_bodies.lock()[0].clone();
    assert_eq!(body["listorchestrators"], true);
    assert_eq!(body["redirectStatus"], 299);
}

#[tokio::test]
async fn redirect_status_reports_login_location() {
    let api = MockApi::new(ConnectMode::Redirect);
    let client = client(serve(Arc::clone(&api)).await);

    let outcome = client.connect().await.expect("connect");
    assert_eq!(
        outcome,
        ConnectOutcome::AuthRedirect("https://login.example.com/".into())
    );

    // A redirect is not a session; the next call asks again.
    client.connect().await.expect("second connect");
    assert_eq!(api.connect_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn redirect_without_location_is_unauthorized() {
    let api = MockApi::new(ConnectMode::RedirectWithoutLocation);
    let client = client(serve(api).await);

    let err = client.connect().await.expect_err("no location");
    let unauthorized = match &err {
        SessionError::Unauthorized => true,
        SessionError::Shared(inner) => matches!(**inner, SessionError::Unauthorized),
        _ => false,
    };
    assert!(unauthorized, "unexpected error: {err}");
}

#[tokio::test]
async fn conversation_calls_reach_their_endpoints() {
    let api = MockApi::new(ConnectMode::Ok);
    let client = client(serve(Arc::clone(&api)).await);

    client.start_conversation("T-100").await.expect("start");
    assert_eq!(api.started.lock().as_slice(), ["T-100".to_string()]);

    client.select_route("kitchen");
    let activity = Activity::user_message("hello there", Some("dl_user".into()));
    client.post_activity("T-100", &activity).await.expect("post");

    let posted = api.posted.lock().clone();
    assert_eq!(posted.len(), 1);
    let (thread, body, route) = &posted[0];
    assert_eq!(thread, "T-100");
    assert_eq!(body["type"], "message");
    assert_eq!(body["text"], "hello there");
    assert_eq!(body["from"]["role"], "user");
    assert_eq!(route.as_deref(), Some("kitchen"));

    let orchestrators = client.list_orchestrators().await.expect("list");
    assert_eq!(orchestrators.len(), 2);
    assert_eq!(
        orchestrators[1],
        Orchestrator {
            name: "recipes".into(),
            default: false,
            description: None,
            pattern: None,
            requirements: None,
        }
    );
    assert!(orchestrators[0].default);

    let speech = client.speech_token().await.expect("speech");
    assert_eq!(speech.token, "fresh");
    assert_eq!(speech.region, "northeurope");
}
