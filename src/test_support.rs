//! In-process stand-in for an OpenCode server, plus helpers for collecting
//! delivered events.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::{Event, EventCallback};

#[derive(Debug, Clone)]
pub enum MessagesMode {
    Json(Value),
    Html,
    Status(StatusCode),
}

#[derive(Debug, Clone)]
enum StreamItem {
    Frame { id: Option<String>, data: String },
    Close,
}

#[derive(Clone)]
pub struct MockOpencode {
    inner: Arc<Inner>,
}

struct Inner {
    session_status: AtomicU16,
    message_status: AtomicU16,
    config_ok: AtomicBool,
    config_probes: AtomicUsize,
    event_stream_enabled: AtomicBool,
    messages: Mutex<MessagesMode>,
    sent: Mutex<Vec<(String, Value)>>,
    event_request_ids: Mutex<Vec<Option<String>>>,
    events: broadcast::Sender<StreamItem>,
}

impl MockOpencode {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                session_status: AtomicU16::new(200),
                message_status: AtomicU16::new(200),
                config_ok: AtomicBool::new(true),
                config_probes: AtomicUsize::new(0),
                event_stream_enabled: AtomicBool::new(true),
                messages: Mutex::new(MessagesMode::Json(json!([]))),
                sent: Mutex::new(Vec::new()),
                event_request_ids: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Binds to an ephemeral port and returns the base url.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/session", post(create_session))
            .route("/session/:id/message", post(send_message))
            .route("/session/:id/messages", get(list_messages))
            .route("/config", get(config))
            .route("/event", get(event_stream))
            .route("/project/files", get(list_files))
            .route("/file/:path", get(read_file))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub fn set_session_status(&self, status: StatusCode) {
        self.inner.session_status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn set_message_status(&self, status: StatusCode) {
        self.inner.message_status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn set_messages(&self, mode: MessagesMode) {
        *self.inner.messages.lock().unwrap() = mode;
    }

    pub fn set_config_ok(&self, ok: bool) {
        self.inner.config_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_event_stream_enabled(&self, enabled: bool) {
        self.inner.event_stream_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn config_probes(&self) -> usize {
        self.inner.config_probes.load(Ordering::SeqCst)
    }

    /// Sends a raw `data:` payload to every open event stream.
    pub fn push_event(&self, raw: &str) {
        let _ = self.inner.events.send(StreamItem::Frame { id: None, data: raw.to_string() });
    }

    pub fn push_event_with_id(&self, id: &str, raw: &str) {
        let _ = self.inner.events.send(StreamItem::Frame {
            id: Some(id.to_string()),
            data: raw.to_string(),
        });
    }

    /// Ends every open event stream.
    pub fn close_event_streams(&self) {
        let _ = self.inner.events.send(StreamItem::Close);
    }

    /// `Last-Event-ID` header of each `/event` request, in arrival order.
    pub fn event_request_ids(&self) -> Vec<Option<String>> {
        self.inner.event_request_ids.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<(String, Value)> {
        self.inner.sent.lock().unwrap().clone()
    }
}

fn status_of(code: &AtomicU16) -> StatusCode {
    StatusCode::from_u16(code.load(Ordering::SeqCst)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn create_session(State(mock): State<MockOpencode>) -> Response {
    let status = status_of(&mock.inner.session_status);
    if !status.is_success() {
        return status.into_response();
    }
    Json(json!({ "id": "ses_test", "title": "test" })).into_response()
}

async fn send_message(
    State(mock): State<MockOpencode>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let status = status_of(&mock.inner.message_status);
    if !status.is_success() {
        return status.into_response();
    }
    let text = body["parts"][0]["text"].as_str().unwrap_or_default().to_string();
    mock.inner.sent.lock().unwrap().push((id.clone(), body));
    Json(json!({
        "info": {
            "id": "msg_reply",
            "sessionID": id,
            "role": "assistant",
            "time": { "created": 0, "completed": 5 }
        },
        "parts": [
            { "id": "p1", "type": "step-start" },
            { "id": "p2", "type": "text", "text": format!("echo: {text}"), "time": { "start": 1, "end": 2 } },
            { "id": "p3", "type": "tool", "tool": "read" }
        ]
    }))
    .into_response()
}

async fn list_messages(State(mock): State<MockOpencode>) -> Response {
    let mode = mock.inner.messages.lock().unwrap().clone();
    match mode {
        MessagesMode::Json(body) => Json(body).into_response(),
        MessagesMode::Html => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<html><body>not here</body></html>",
        )
            .into_response(),
        MessagesMode::Status(status) => status.into_response(),
    }
}

async fn config(State(mock): State<MockOpencode>) -> Response {
    mock.inner.config_probes.fetch_add(1, Ordering::SeqCst);
    if mock.inner.config_ok.load(Ordering::SeqCst) {
        Json(json!({})).into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn event_stream(State(mock): State<MockOpencode>, headers: HeaderMap) -> Response {
    if !mock.inner.event_stream_enabled.load(Ordering::SeqCst) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mock.inner.event_request_ids.lock().unwrap().push(last_event_id);

    let rx = mock.inner.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(StreamItem::Frame { id, data }) => {
                    let mut event = SseEvent::default().data(data);
                    if let Some(id) = id {
                        event = event.id(id);
                    }
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                Ok(StreamItem::Close) => return None,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).into_response()
}

async fn list_files() -> Json<Value> {
    Json(json!({
        "files": [
            { "path": "src", "type": "dir" },
            { "path": "src/main.rs", "type": "file" }
        ]
    }))
}

async fn read_file(Path(path): Path<String>) -> Response {
    if path == "src/main.rs" {
        Json(json!({ "content": format!("contents of {path}") })).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// A base url nothing is listening on.
pub async fn free_local_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<Event>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: EventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

/// Waits (up to five seconds) until at least `n` events were delivered.
pub async fn wait_for_events(events: &Arc<Mutex<Vec<Event>>>, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while events.lock().unwrap().len() < n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {n} events, got {:?}",
            events.lock().unwrap()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
