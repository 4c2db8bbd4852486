//! Discord Transport Implementation
//!
//! Discord REST API v10 over reqwest.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DISCORD_TOKEN`: Discord bot token

use super::traits::*;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01)
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Private thread channel type
const PRIVATE_THREAD: u8 = 12;

/// Upper bound on one REST call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest 429 backoff honored before retrying
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Thread names above this length are rejected by Discord
pub const THREAD_NAME_LIMIT: usize = 100;

/// Discord transport configuration
#[derive(Clone)]
pub struct DiscordConfig {
    /// Bot token
    pub bot_token: String,
    /// REST base URL
    pub api_base: String,
    /// Retries after a 429 before giving up
    pub max_retries: usize,
    /// Auto-archive period for created threads, in minutes
    pub auto_archive_minutes: u32,
}

impl DiscordConfig {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            api_base: DISCORD_API_BASE.to_string(),
            max_retries: 3,
            auto_archive_minutes: 10080,
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("max_retries", &self.max_retries)
            .field("auto_archive_minutes", &self.auto_archive_minutes)
            .finish()
    }
}

/// The bot's own account
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: String,
    pub username: String,
}

/// Discord transport implementation
#[derive(Clone)]
pub struct DiscordTransport {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordTransport {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Verify the token by fetching the bot's own user
    pub async fn current_user(&self) -> Result<BotUser, TransportError> {
        let value = self.call(Method::GET, "/users/@me", None).await?;
        serde_json::from_value(value).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Issue a REST call, retrying on 429 with the server-provided delay
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.config.api_base, path);
        let mut attempt = 0;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.config.bot_token));
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text)
                    .map_err(|e| TransportError::Malformed(e.to_string()));
            }

            let error_text = response.text().await.unwrap_or_default();
            match status.as_u16() {
                429 => {
                    let retry_after = retry_after_secs(&error_text);
                    if attempt >= self.config.max_retries {
                        return Err(TransportError::RateLimited(retry_after));
                    }
                    attempt += 1;
                    warn!(
                        "Discord rate limited on {} {}, retrying in {:.2}s (attempt {})",
                        method, path, retry_after, attempt
                    );
                    tokio::time::sleep(retry_delay(retry_after)).await;
                }
                404 => return Err(TransportError::NotFound(path.to_string())),
                403 => return Err(TransportError::PermissionDenied(path.to_string())),
                code => {
                    return Err(TransportError::Api {
                        status: code,
                        body: error_text,
                    })
                }
            }
        }
    }

    async fn post_message(&self, channel_id: &str, payload: Value) -> Result<String, TransportError> {
        let value = self
            .call(
                Method::POST,
                &format!("/channels/{}/messages", channel_id),
                Some(&payload),
            )
            .await?;
        id_of(&value)
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn create_private_subchannel(
        &self,
        parent_id: &str,
        name: &str,
        invitee: &str,
    ) -> Result<String, TransportError> {
        let payload = json!({
            "name": name,
            "type": PRIVATE_THREAD,
            "invitable": false,
            "auto_archive_duration": self.config.auto_archive_minutes,
        });
        let created = self
            .call(
                Method::POST,
                &format!("/channels/{}/threads", parent_id),
                Some(&payload),
            )
            .await?;
        let thread_id = id_of(&created)?;

        self.call(
            Method::PUT,
            &format!("/channels/{}/thread-members/{}", thread_id, invitee),
            None,
        )
        .await?;

        info!("Created private thread {} under {} for {}", thread_id, parent_id, invitee);
        Ok(thread_id)
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError> {
        debug!("Sending {} chars to {}", text.chars().count(), channel_id);
        self.post_message(
            channel_id,
            json!({
                "content": text,
                "allowed_mentions": { "parse": [] },
            }),
        )
        .await
    }

    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, TransportError> {
        self.post_message(
            channel_id,
            json!({
                "content": text,
                "allowed_mentions": { "parse": [], "replied_user": true },
                "message_reference": {
                    "message_id": message_id,
                    "fail_if_not_exists": false,
                },
            }),
        )
        .await
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, TransportError> {
        let value = self
            .call(Method::GET, &format!("/channels/{}", channel_id), None)
            .await?;
        let channel: DiscordChannelPayload =
            serde_json::from_value(value).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(channel.into_info())
    }
}

/// Channel object as returned by `GET /channels/{id}` and thread gateway events
#[derive(Debug, Deserialize)]
pub struct DiscordChannelPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl DiscordChannelPayload {
    pub fn into_info(self) -> ChannelInfo {
        ChannelInfo {
            created_at: snowflake_timestamp(&self.id),
            kind: ChannelKind::from_discord(self.kind),
            parent_id: self.parent_id,
            id: self.id,
        }
    }
}

/// Creation time encoded in a Discord snowflake ID
pub fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let raw: u64 = id.parse().ok()?;
    let millis = (raw >> 22) as i64 + DISCORD_EPOCH_MS;
    Utc.timestamp_millis_opt(millis).single()
}

fn id_of(value: &Value) -> Result<String, TransportError> {
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| TransportError::Malformed("response has no id".to_string()))
}

/// Delay before retrying a 429, capped at `MAX_RETRY_DELAY`
fn retry_delay(retry_after: f64) -> Duration {
    Duration::try_from_secs_f64(retry_after)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

fn retry_after_secs(body: &str) -> f64 {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .unwrap_or(1.0)
}
