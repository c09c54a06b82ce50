use reqwest::StatusCode;
use std::fmt;

/// Client call that produced an error. Rendered in lowercase prose so it
/// reads naturally inside error messages ("failed to create session: ...").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateSession,
    SendMessage,
    ListFiles,
    ReadFile,
    SubscribeEvents,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::CreateSession => "create session",
            Operation::SendMessage => "send message",
            Operation::ListFiles => "list files",
            Operation::ReadFile => "read file",
            Operation::SubscribeEvents => "subscribe to events",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to {operation}: {status_text}")]
    Status {
        operation: Operation,
        status: StatusCode,
        status_text: String,
    },

    #[error("failed to {operation}: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode {operation} response: {source}")]
    Decode {
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },
}

impl ClientError {
    pub(crate) fn status(operation: Operation, status: StatusCode) -> Self {
        let status_text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        ClientError::Status { operation, status, status_text }
    }

    pub(crate) fn transport(operation: Operation, source: reqwest::Error) -> Self {
        ClientError::Transport { operation, source }
    }

    pub(crate) fn decode(operation: Operation, source: reqwest::Error) -> Self {
        ClientError::Decode { operation, source }
    }
}
