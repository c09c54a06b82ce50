//! Event subscription: delivers server-originated (and a few synthesized)
//! events to a callback until the returned [`Subscription`] is disconnected.
//!
//! Two transports implement [`EventTransport`]: [`stream::StreamingEvents`]
//! reads the `/event` server-sent-events endpoint, [`poll::PollingEvents`]
//! probes `/config` on a timer and emits a client-side liveness signal.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ApiBase;

pub mod poll;
pub mod sse;
pub mod stream;

pub use poll::PollingEvents;
pub use stream::StreamingEvents;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The event stream was (re)opened. Synthesized by the client.
    Connected,
    /// A frame received from the server, tagged with its `type`.
    Server(String),
    /// The event stream failed. Synthesized by the client.
    Error,
    /// Polling-mode heartbeat. Synthesized by the client; the server never
    /// sends these.
    Liveness,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn connected() -> Self {
        Self::now(EventKind::Connected, json!({ "status": "connected" }))
    }

    pub fn server(event_type: impl Into<String>, data: Value) -> Self {
        Self::now(EventKind::Server(event_type.into()), data)
    }

    pub fn transport_error() -> Self {
        Self::now(EventKind::Error, json!({ "error": "event stream connection failed" }))
    }

    pub fn liveness(poll_count: u64) -> Self {
        let timestamp = Utc::now();
        Self {
            kind: EventKind::Liveness,
            data: json!({
                "pollCount": poll_count,
                "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            timestamp,
        }
    }

    fn now(kind: EventKind, data: Value) -> Self {
        Self { kind, data, timestamp: Utc::now() }
    }

    /// The `type` string of the event as subscribers see it.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            EventKind::Connected => "connected",
            EventKind::Server(t) => t,
            EventKind::Error => "error",
            EventKind::Liveness => "heartbeat",
        }
    }

    /// True for events the client made up rather than received.
    pub fn is_synthetic(&self) -> bool {
        !matches!(self.kind, EventKind::Server(_))
    }

    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Hands events to the subscriber until the subscription is closed.
///
/// The callback runs under a read lock and `close` takes the write lock, so
/// once `close` returns no callback is running and none will start. A
/// callback must not disconnect its own subscription.
#[derive(Clone)]
pub struct Dispatcher {
    callback: Arc<RwLock<Option<EventCallback>>>,
    token: CancellationToken,
}

impl Dispatcher {
    fn new(callback: EventCallback) -> Self {
        Self {
            callback: Arc::new(RwLock::new(Some(callback))),
            token: CancellationToken::new(),
        }
    }

    pub fn deliver(&self, event: Event) {
        let callback = self.callback.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(event);
        }
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    fn close(&self) {
        self.token.cancel();
        self.callback.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Strategy used by a client to produce events.
pub trait EventTransport: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Start delivering events. The returned task runs until the dispatcher
    /// is cancelled.
    fn spawn(&self, api: ApiBase, dispatcher: Dispatcher) -> JoinHandle<()>;
}

/// Handle for a running event subscription. Disconnecting is idempotent and
/// also happens on drop.
pub struct Subscription {
    dispatcher: Dispatcher,
    task: JoinHandle<()>,
    transport: &'static str,
}

impl Subscription {
    pub fn start(transport: &dyn EventTransport, api: ApiBase, callback: EventCallback) -> Self {
        let dispatcher = Dispatcher::new(callback);
        let task = transport.spawn(api, dispatcher.clone());
        Self { dispatcher, task, transport: transport.name() }
    }

    pub fn disconnect(&self) {
        if !self.is_active() {
            return;
        }
        self.dispatcher.close();
        self.task.abort();
        tracing::info!(transport = self.transport, "stopped event monitoring");
    }

    pub fn is_active(&self) -> bool {
        !self.dispatcher.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventMode {
    /// Stream when `/event` speaks SSE, poll otherwise.
    Auto,
    Stream,
    Poll,
}

impl fmt::Display for EventMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventMode::Auto => "auto",
            EventMode::Stream => "stream",
            EventMode::Poll => "poll",
        };
        f.write_str(s)
    }
}

/// Checks whether the server exposes a server-sent-events endpoint. The
/// response body is dropped without being read.
pub async fn detect_streaming(api: &ApiBase, timeout: Duration) -> bool {
    let url = api.endpoint(&["event"]);
    let response = api
        .http()
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .timeout(timeout)
        .send()
        .await;
    match response {
        Ok(r) if r.status().is_success() => r
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream")),
        Ok(r) => {
            tracing::debug!(status = %r.status(), "event endpoint unavailable");
            false
        }
        Err(error) => {
            tracing::debug!(%error, "event endpoint probe failed");
            false
        }
    }
}
