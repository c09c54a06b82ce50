use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
}

/// A message as the CLI renders it, flattened from the server's part-based
/// representation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: String,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// `timestamp` as ISO-8601 with millisecond precision, e.g.
    /// `1970-01-01T00:00:00.000Z`.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

fn serialize_iso_millis<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiMessage {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<ApiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageInfo {
    pub id: String,
    #[serde(rename = "sessionID", default)]
    pub session_id: String,
    pub role: String,
    pub time: MessageTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageTime {
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiPart {
    #[serde(default)]
    pub id: String,
    /// Missing on some parts; an untyped part is treated as non-text.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<PartTime>,
}

impl ApiPart {
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartTime {
    pub start: i64,
    pub end: i64,
}

/// Normalization keeps only text parts. Tool calls and other part kinds are
/// dropped; callers that need them must work with `ApiMessage` directly.
impl From<ApiMessage> for Message {
    fn from(api: ApiMessage) -> Self {
        let content: String = api
            .parts
            .iter()
            .filter(|p| p.is_text())
            .filter_map(|p| p.text.as_deref())
            .collect();
        Message {
            id: api.info.id,
            content: content.trim().to_string(),
            role: api.info.role,
            timestamp: epoch_millis_to_utc(api.info.time.created),
        }
    }
}

/// Out-of-range values map to the epoch so normalization never fails.
pub fn epoch_millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Request body for `POST /session/{id}/message`.
#[derive(Debug, Serialize)]
pub struct SendMessageBody<'a> {
    pub parts: Vec<TextPartInput<'a>>,
}

#[derive(Debug, Serialize)]
pub struct TextPartInput<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: &'a str,
}

impl<'a> SendMessageBody<'a> {
    pub fn text(content: &'a str) -> Self {
        Self { parts: vec![TextPartInput { kind: "text", text: content }] }
    }
}
