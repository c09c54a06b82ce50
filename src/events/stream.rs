use futures::StreamExt as _;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::sse::{SseDecoder, SseFrame};
use super::{Dispatcher, Event, EventTransport};
use crate::client::ApiBase;
use crate::error::{ClientError, Operation};

/// Delay before reconnecting after the stream fails, unless the server sent
/// a `retry:` field.
pub const DEFAULT_RETRY: Duration = Duration::from_secs(3);

/// Reads `/event` as a server-sent-events stream. Reconnects after transport
/// failures, emitting `error` for each failure and `connected` for each
/// successful open.
#[derive(Debug, Clone)]
pub struct StreamingEvents {
    pub retry: Duration,
}

impl Default for StreamingEvents {
    fn default() -> Self {
        Self { retry: DEFAULT_RETRY }
    }
}

impl EventTransport for StreamingEvents {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn spawn(&self, api: ApiBase, dispatcher: Dispatcher) -> JoinHandle<()> {
        let retry = self.retry;
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.cancelled() => {}
                _ = run(api, &dispatcher, retry) => {}
            }
        })
    }
}

async fn run(api: ApiBase, dispatcher: &Dispatcher, mut retry: Duration) {
    tracing::info!(base_url = %api.base_url(), "starting event monitoring (streaming mode)");
    let mut last_event_id: Option<String> = None;
    loop {
        match open(&api, last_event_id.as_deref()).await {
            Ok(response) => {
                tracing::info!(last_event_id = ?last_event_id, "event stream connected");
                dispatcher.deliver(Event::connected());
                match pump(response, dispatcher, &mut retry, &mut last_event_id).await {
                    Ok(()) => tracing::warn!("event stream closed by server"),
                    Err(error) => tracing::warn!(%error, "event stream interrupted"),
                }
            }
            Err(error) => {
                tracing::warn!(%error, "event stream connection failed");
            }
        }
        dispatcher.deliver(Event::transport_error());
        tokio::time::sleep(retry).await;
    }
}

/// Resumes after `last_event_id` when the server sent ids on a previous
/// connection.
async fn open(api: &ApiBase, last_event_id: Option<&str>) -> Result<reqwest::Response, ClientError> {
    let mut request = api
        .http()
        .get(api.endpoint(&["event"]))
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::CACHE_CONTROL, "no-cache");
    if let Some(id) = last_event_id {
        request = request.header("Last-Event-ID", id);
    }
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::transport(Operation::SubscribeEvents, e))?;
    if !response.status().is_success() {
        return Err(ClientError::status(Operation::SubscribeEvents, response.status()));
    }
    Ok(response)
}

async fn pump(
    response: reqwest::Response,
    dispatcher: &Dispatcher,
    retry: &mut Duration,
    last_event_id: &mut Option<String>,
) -> Result<(), ClientError> {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    while let Some(chunk) = body.next().await {
        let bytes = chunk.map_err(|e| ClientError::transport(Operation::SubscribeEvents, e))?;
        for frame in decoder.push(&bytes) {
            if let Some(ms) = frame.retry {
                *retry = Duration::from_millis(ms);
            }
            if frame.id.is_some() {
                last_event_id.clone_from(&frame.id);
            }
            if let Some(event) = frame_to_event(&frame) {
                dispatcher.deliver(event);
            }
        }
    }
    Ok(())
}

/// Frames that are not JSON are logged and dropped. The event type comes
/// from the payload's `type`, then the SSE `event:` name, then `"message"`.
pub fn frame_to_event(frame: &SseFrame) -> Option<Event> {
    if frame.data.is_empty() {
        return None;
    }
    let data: Value = match serde_json::from_str(&frame.data) {
        Ok(v) => v,
        Err(error) => {
            tracing::warn!(%error, data = %frame.data, "failed to parse event data, skipping");
            return None;
        }
    };
    let event_type = data
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| frame.event.clone())
        .unwrap_or_else(|| "message".to_string());
    Some(Event::server(event_type, data))
}
