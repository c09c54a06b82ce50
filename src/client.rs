//! HTTP client for the OpenCode API.
//!
//! Session creation, message sending and the file calls fail loudly with a
//! [`ClientError`]. Message listing never fails: transport, status and
//! content-type problems degrade to an empty list with a warning, because the
//! listing endpoint is not implemented by every server build.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Operation};
use crate::events::{
    EventCallback, EventMode, EventTransport, PollingEvents, StreamingEvents, Subscription,
    detect_streaming,
};
use crate::project::{FileContent, FileItem, FileList};
use crate::session::{ApiMessage, Message, SendMessageBody, Session};
use crate::settings::EffectiveSettings;

/// Base URL plus the shared connection pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiBase {
    http: Client,
    base_url: Url,
}

impl ApiBase {
    pub fn new(base_url: Url) -> Self {
        Self { http: Client::new(), base_url }
    }

    #[cfg(test)]
    pub fn parse(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self::new(parse_base_url(base_url)?))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Appends `segments` to the base path. Each segment is percent-encoded
    /// on its own, so ids and file paths cannot escape their position.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `GET /config`; any 2xx within `timeout` counts as alive.
    pub async fn probe_liveness(&self, timeout: Duration) -> bool {
        match self.http.get(self.endpoint(&["config"])).timeout(timeout).send().await {
            Ok(r) => r.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "liveness probe failed");
                false
            }
        }
    }
}

pub fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidBaseUrl { url: raw.to_string(), reason };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base url".into()));
    }
    Ok(url)
}

#[async_trait]
pub trait OpencodeApi: Send + Sync {
    async fn create_session(&self) -> Result<Session, ClientError>;
    async fn send_message(&self, session_id: &str, content: &str) -> Result<Message, ClientError>;
    async fn list_messages(&self, session_id: &str) -> Vec<Message>;
    async fn list_files(&self) -> Result<Vec<FileItem>, ClientError>;
    async fn read_file(&self, path: &str) -> Result<String, ClientError>;
    async fn probe_liveness(&self, timeout: Duration) -> bool;
    fn connect_events(&self, callback: EventCallback) -> Subscription;
}

#[derive(Debug, Clone)]
pub struct OpencodeClient {
    api: ApiBase,
    events: Arc<dyn EventTransport>,
}

impl OpencodeClient {
    pub fn new(api: ApiBase, events: Arc<dyn EventTransport>) -> Self {
        Self { api, events }
    }

    /// Builds a client from resolved settings. With [`EventMode::Auto`] the
    /// `/event` endpoint is probed once here to pick the transport.
    pub async fn from_settings(settings: &EffectiveSettings) -> Self {
        let api = ApiBase::new(settings.base_url.clone());
        let polling = PollingEvents {
            interval: settings.poll_interval,
            probe_timeout: settings.probe_timeout,
            heartbeat_every: settings.heartbeat_every,
        };
        let streaming = StreamingEvents { retry: settings.stream_retry };

        let events: Arc<dyn EventTransport> = match settings.event_mode {
            EventMode::Stream => Arc::new(streaming),
            EventMode::Poll => Arc::new(polling),
            EventMode::Auto => {
                if detect_streaming(&api, settings.probe_timeout).await {
                    Arc::new(streaming)
                } else {
                    Arc::new(polling)
                }
            }
        };
        Self::new(api, events)
    }

    /// Same server, different event transport.
    pub fn with_event_transport(&self, events: Arc<dyn EventTransport>) -> Self {
        Self { api: self.api.clone(), events }
    }

    pub fn base_url(&self) -> &Url {
        self.api.base_url()
    }

    pub fn event_transport(&self) -> &'static str {
        self.events.name()
    }

    async fn fetch(
        &self,
        operation: Operation,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::transport(operation, e))?;
        if !response.status().is_success() {
            return Err(ClientError::status(operation, response.status()));
        }
        Ok(response)
    }
}

#[async_trait]
impl OpencodeApi for OpencodeClient {
    async fn create_session(&self) -> Result<Session, ClientError> {
        let op = Operation::CreateSession;
        let request = self.api.http().post(self.api.endpoint(&["session"]));
        let session: Session = self
            .fetch(op, request)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::decode(op, e))?;
        tracing::debug!(session_id = %session.id, "session created");
        Ok(session)
    }

    async fn send_message(&self, session_id: &str, content: &str) -> Result<Message, ClientError> {
        let op = Operation::SendMessage;
        let request = self
            .api
            .http()
            .post(self.api.endpoint(&["session", session_id, "message"]))
            .json(&SendMessageBody::text(content));
        let api_message: ApiMessage = self
            .fetch(op, request)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::decode(op, e))?;
        Ok(Message::from(api_message))
    }

    async fn list_messages(&self, session_id: &str) -> Vec<Message> {
        let url = self.api.endpoint(&["session", session_id, "messages"]);
        let response = match self.api.http().get(url).send().await {
            Ok(r) => r,
            Err(error) => {
                tracing::warn!(%error, session_id, "failed to fetch messages, returning empty messages");
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, session_id, "messages endpoint returned an error, returning empty messages");
            return Vec::new();
        }
        if !is_json(&response) {
            tracing::warn!(session_id, "messages endpoint returned non-JSON response, returning empty messages");
            return Vec::new();
        }

        match response.json::<Value>().await {
            Ok(body) => decode_message_list(body),
            Err(error) => {
                tracing::warn!(%error, session_id, "failed to read messages body, returning empty messages");
                Vec::new()
            }
        }
    }

    async fn list_files(&self) -> Result<Vec<FileItem>, ClientError> {
        let op = Operation::ListFiles;
        let request = self.api.http().get(self.api.endpoint(&["project", "files"]));
        let list: FileList = self
            .fetch(op, request)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::decode(op, e))?;
        Ok(list.files)
    }

    async fn read_file(&self, path: &str) -> Result<String, ClientError> {
        let op = Operation::ReadFile;
        let request = self.api.http().get(self.api.endpoint(&["file", path]));
        let file: FileContent = self
            .fetch(op, request)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::decode(op, e))?;
        Ok(file.content)
    }

    async fn probe_liveness(&self, timeout: Duration) -> bool {
        self.api.probe_liveness(timeout).await
    }

    fn connect_events(&self, callback: EventCallback) -> Subscription {
        Subscription::start(self.events.as_ref(), self.api.clone(), callback)
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// The listing body is expected to be an array of wire messages, the same
/// shape `send_message` receives. Elements that do not decode are skipped.
pub fn decode_message_list(body: Value) -> Vec<Message> {
    let Value::Array(items) = body else {
        tracing::warn!("messages endpoint returned a non-array body, returning empty messages");
        return Vec::new();
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<ApiMessage>(item) {
            Ok(api) => Some(Message::from(api)),
            Err(error) => {
                tracing::warn!(index, %error, "skipping undecodable message");
                None
            }
        })
        .collect()
}
