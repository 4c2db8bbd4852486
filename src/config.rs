//! Configuration management

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const USER_TOPICS_FILE: &str = "user_topics.json";
pub const SESSION_MAP_FILE: &str = "thread_map.json";
pub const HISTORY_FILE: &str = "histories.json";

/// Which OpenAI API answers topic messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Assistants API: remote threads and polled runs
    Assistants,
    /// Chat completions with locally stored history
    Chat,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "assistants" | "assistant" => Ok(Self::Assistants),
            "chat" | "completions" => Ok(Self::Chat),
            other => Err(anyhow!("unknown backend {:?} (expected assistants or chat)", other)),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// User-visible texts
#[derive(Debug, Clone)]
pub struct Notices {
    pub busy: String,
    pub topic_created: String,
    pub topic_resumed: String,
    pub topic_welcome: String,
    pub session_ready: String,
    pub processing: String,
    pub run_failed: String,
    pub timed_out: String,
    pub empty_response: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            busy: "⚠️ The server is busy right now. Please try again in a moment.".to_string(),
            topic_created: "✅ I created a private topic for you. Let's talk there 👉".to_string(),
            topic_resumed: "↩️ You already have a private topic. Let's continue there 👉".to_string(),
            topic_welcome: "Send your question here 😊".to_string(),
            session_ready: "🧠 Ready! We can continue our conversation here. Feel free to ask."
                .to_string(),
            processing: "⏳ Processing your question...".to_string(),
            run_failed: "⚠️ I couldn't finish an answer this time. Please try again.".to_string(),
            timed_out: "⌛ That took too long to answer. Please try again in a moment.".to_string(),
            empty_response: "(no response)".to_string(),
        }
    }
}

impl Notices {
    /// Notice pointing at a newly created topic
    pub fn created_in(&self, topic_id: &str) -> String {
        format!("{} <#{}>", self.topic_created, topic_id)
    }

    /// Notice pointing at an existing topic
    pub fn resumed_in(&self, topic_id: &str) -> String {
        format!("{} <#{}>", self.topic_resumed, topic_id)
    }
}

/// Bridge configuration
#[derive(Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,

    /// OpenAI API key
    pub openai_api_key: String,

    /// Assistant used for runs (assistants backend)
    pub assistant_id: String,

    /// The only channel the bot listens in
    pub authorized_channel_id: String,

    /// Directory holding the persisted maps
    pub data_dir: PathBuf,

    /// Zone used for topic name timestamps
    pub timezone: Tz,

    pub backend: BackendKind,

    pub openai_base_url: String,

    /// Model for the chat backend
    pub model: String,

    /// Optional system prompt for the chat backend
    pub system_prompt: Option<String>,

    /// Delay between run status polls
    pub poll_interval: Duration,

    /// Upper bound on waiting for one reply
    pub run_timeout: Duration,

    /// Turns kept per user by the chat backend
    pub history_limit: usize,

    pub log_format: LogFormat,

    pub notices: Notices,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Missing credentials are left empty for the
    /// preflight check to report; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = var("DISCORD_TOKEN")
            .or_else(|| var("DISCORD_BOT_TOKEN"))
            .unwrap_or_default();
        let openai_api_key = var("OPENAI_API_KEY").unwrap_or_default();
        let assistant_id = var("OPENAI_ASSISTANT_ID").unwrap_or_default();
        let authorized_channel_id = var("AUTHORIZED_CHANNEL_ID").unwrap_or_default();

        let data_dir = var("BRIDGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/data"));

        let timezone_name = var("BRIDGE_TIMEZONE").unwrap_or_else(|| "America/Sao_Paulo".to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow!("invalid BRIDGE_TIMEZONE {:?}: {}", timezone_name, e))?;

        let backend = match var("BRIDGE_BACKEND") {
            Some(v) => v.parse().context("invalid BRIDGE_BACKEND")?,
            None => BackendKind::Assistants,
        };

        let openai_base_url =
            var("OPENAI_BASE_URL").unwrap_or_else(|| crate::backend::OPENAI_API_BASE.to_string());
        let model = var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let system_prompt = var("BRIDGE_SYSTEM_PROMPT");

        let poll_interval_ms: u64 = parse_or(&var, "BRIDGE_POLL_INTERVAL_MS", 1500)?;
        let run_timeout_secs: u64 = parse_or(&var, "BRIDGE_RUN_TIMEOUT_SECS", 60)?;
        let history_limit: usize = parse_or(&var, "BRIDGE_HISTORY_LIMIT", 50)?;

        let log_format = match var("BRIDGE_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            discord_token,
            openai_api_key,
            assistant_id,
            authorized_channel_id,
            data_dir,
            timezone,
            backend,
            openai_base_url,
            model,
            system_prompt,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            run_timeout: Duration::from_secs(run_timeout_secs.max(1)),
            history_limit: history_limit.max(1),
            log_format,
            notices: Notices::default(),
        })
    }

    pub fn user_topics_path(&self) -> PathBuf {
        self.data_dir.join(USER_TOPICS_FILE)
    }

    pub fn session_map_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_MAP_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("Config")
            .field("discord_token", &redact(&self.discord_token))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("assistant_id", &self.assistant_id)
            .field("authorized_channel_id", &self.authorized_channel_id)
            .field("data_dir", &self.data_dir)
            .field("timezone", &self.timezone)
            .field("backend", &self.backend)
            .field("openai_base_url", &self.openai_base_url)
            .field("model", &self.model)
            .field("poll_interval", &self.poll_interval)
            .field("run_timeout", &self.run_timeout)
            .field("history_limit", &self.history_limit)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {} {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
