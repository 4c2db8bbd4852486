//! OpenAI Assistants API Client
//!
//! Threads hold the conversation, runs produce the assistant's reply. Uses the v2 beta
//! header on every call.

use super::{check_status, http_client, AssistantBackend, BackendError, Role, RunError, RunSnapshot, RunStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ASSISTANTS_BETA: &str = "assistants=v2";

/// How many recent messages to scan for the newest assistant reply
const LATEST_MESSAGES_WINDOW: u32 = 20;

/// Assistants API client
#[derive(Clone)]
pub struct OpenAiAssistants {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunRequest<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<RunError>,
}

impl From<RunObject> for RunSnapshot {
    fn from(run: RunObject) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            error: run.last_error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    r#type: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

impl OpenAiAssistants {
    pub fn new(api_key: &str) -> Self {
        Self::with_base_url(api_key, super::OPENAI_API_BASE)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }
}

#[async_trait]
impl AssistantBackend for OpenAiAssistants {
    async fn create_session(&self) -> Result<String, BackendError> {
        let response = self
            .post("/threads")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let thread: ObjectId = check_status(response).await?.json().await?;
        info!("Created assistant thread {}", thread.id);
        Ok(thread.id)
    }

    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
    ) -> Result<(), BackendError> {
        let request = CreateMessageRequest {
            role: role.as_str(),
            content: text,
        };
        let response = self
            .post(&format!("/threads/{}/messages", session_id))
            .json(&request)
            .send()
            .await?;
        check_status(response).await?;
        debug!("Appended {} turn to {} ({} chars)", role, session_id, text.len());
        Ok(())
    }

    async fn start_run(
        &self,
        session_id: &str,
        assistant_ref: &str,
    ) -> Result<RunSnapshot, BackendError> {
        let response = self
            .post(&format!("/threads/{}/runs", session_id))
            .json(&CreateRunRequest {
                assistant_id: assistant_ref,
            })
            .send()
            .await?;
        let run: RunObject = check_status(response).await?.json().await?;
        debug!("Started run {} on {} ({})", run.id, session_id, run.status);
        Ok(run.into())
    }

    async fn get_run_status(
        &self,
        session_id: &str,
        run_id: &str,
    ) -> Result<RunSnapshot, BackendError> {
        let response = self
            .get(&format!("/threads/{}/runs/{}", session_id, run_id))
            .send()
            .await?;
        let run: RunObject = check_status(response).await?.json().await?;
        Ok(run.into())
    }

    async fn get_latest_output(&self, session_id: &str) -> Result<String, BackendError> {
        let response = self
            .get(&format!(
                "/threads/{}/messages?order=desc&limit={}",
                session_id, LATEST_MESSAGES_WINDOW
            ))
            .send()
            .await?;
        let list: MessageList = check_status(response).await?.json().await?;
        latest_assistant_text(list)
    }
}

/// Newest assistant message (the list is newest-first), text parts joined
fn latest_assistant_text(list: MessageList) -> Result<String, BackendError> {
    let message = list
        .data
        .into_iter()
        .find(|m| m.role == Role::Assistant.as_str())
        .ok_or_else(|| BackendError::Malformed("no assistant message in thread".to_string()))?;

    let text = message
        .content
        .into_iter()
        .filter(|part| part.r#type == "text")
        .filter_map(|part| part.text.map(|t| t.value))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(text)
}
