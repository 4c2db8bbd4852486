//! OpenAI Chat Completions Client
//!
//! Stateless: every call carries the full history.

use super::{check_status, http_client, BackendError, CompletionBackend, Turn};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Chat completions client
#[derive(Clone)]
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

impl OpenAiChat {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_base_url(api_key, model, super::OPENAI_API_BASE)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            system_prompt: None,
        }
    }

    /// Prepend a system message to every request
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    fn build_request<'a>(&'a self, history: &'a [Turn]) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message {
                role: "system",
                content: prompt,
            });
        }
        messages.extend(history.iter().map(|turn| Message {
            role: turn.role.as_str(),
            content: &turn.content,
        }));

        ChatRequest {
            model: &self.model,
            messages,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiChat {
    async fn complete(&self, history: &[Turn]) -> Result<String, BackendError> {
        let request = self.build_request(history);
        debug!("Calling chat completions: model={}, turns={}", self.model, history.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let result: ChatResponse = check_status(response).await?.json().await?;

        if let Some(usage) = &result.usage {
            info!(
                "Chat response: model={}, in={}, out={}",
                self.model, usage.prompt_tokens, usage.completion_tokens
            );
        }

        result
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::Malformed("no choices in completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_includes_system_prompt_first() {
        let client = OpenAiChat::new("sk-test", "gpt-4o-mini")
            .with_system_prompt(Some("Be brief.".to_string()));
        let history = vec![Turn::user("Hello"), Turn::assistant("Hi!"), Turn::user("2+2?")];

        let value = serde_json::to_value(client.build_request(&history)).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0], json!({ "role": "system", "content": "Be brief." }));
        assert_eq!(value["messages"][3], json!({ "role": "user", "content": "2+2?" }));
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let client = OpenAiChat::new("sk-test", "m").with_system_prompt(Some("  ".to_string()));
        let history = vec![Turn::user("x")];
        let value = serde_json::to_value(client.build_request(&history)).unwrap();
        assert_eq!(value["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_response_parsing() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "4" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13 }
        }))
        .unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("4"));
        assert_eq!(response.usage.unwrap().completion_tokens, 1);
    }
}
