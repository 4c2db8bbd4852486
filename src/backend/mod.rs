//! AI Backend
//!
//! Two ways of talking to OpenAI:
//! - `assistants`: stateful threads and runs (Assistants API v2), polled to completion
//! - `chat`: stateless chat completions over a locally kept history

pub mod assistants;
pub mod chat;

pub use assistants::OpenAiAssistants;
pub use chat::OpenAiChat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Upper bound on one API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Error types for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),
}

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Run status as reported by the Assistants API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// No further progress will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Incomplete => "incomplete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic detail attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<RunError>,
}

/// Stateful assistant backend: sessions hold the history, runs compute replies
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Create a remote conversation; returns its session ID
    async fn create_session(&self) -> Result<String, BackendError>;

    async fn append_turn(&self, session_id: &str, role: Role, text: &str)
        -> Result<(), BackendError>;

    /// Start computing a reply with the assistant `assistant_ref`
    async fn start_run(&self, session_id: &str, assistant_ref: &str)
        -> Result<RunSnapshot, BackendError>;

    async fn get_run_status(&self, session_id: &str, run_id: &str)
        -> Result<RunSnapshot, BackendError>;

    /// Text of the newest assistant message in the session
    async fn get_latest_output(&self, session_id: &str) -> Result<String, BackendError>;
}

/// Stateless completion backend: the caller supplies the whole history
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, history: &[Turn]) -> Result<String, BackendError>;
}

/// HTTP client shared by the OpenAI clients
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-success response into `BackendError::Api`
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_parsing() {
        let status: RunStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, RunStatus::InProgress);
        let status: RunStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, RunStatus::Unknown);
    }

    #[test]
    fn test_terminal_classification() {
        for status in [RunStatus::Failed, RunStatus::Cancelled, RunStatus::Expired] {
            assert!(status.is_terminal());
            assert!(!status.is_success());
        }
        assert!(RunStatus::Completed.is_success());
        for status in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::RequiresAction,
            RunStatus::Cancelling,
            RunStatus::Unknown,
        ] {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn test_turn_serialization() {
        let turn = Turn::user("2+2?");
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            serde_json::json!({ "role": "user", "content": "2+2?" })
        );
    }
}
