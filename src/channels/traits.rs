//! Transport Trait Definitions
//!
//! What the bridge needs from a chat platform, independent of the wire protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error types for transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limited: retry after {0:.1} seconds")]
    RateLimited(f64),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed platform response: {0}")]
    Malformed(String),
}

/// Channel kinds the bridge distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    PublicThread,
    PrivateThread,
    Other(u8),
}

impl ChannelKind {
    /// Map a Discord channel type number
    pub fn from_discord(kind: u8) -> Self {
        match kind {
            0 => Self::Text,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            other => Self::Other(other),
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Self::PublicThread | Self::PrivateThread)
    }
}

/// What the platform reports about a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: ChannelKind,
    pub created_at: Option<DateTime<Utc>>,
}

/// Inbound chat message, already normalized by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform message ID (used for replies)
    pub message_id: String,

    pub author_id: String,

    /// Guild nickname, else global name, else username
    pub author_display_name: String,

    pub channel_id: String,

    /// Parent channel when `channel_id` is a thread
    pub parent_id: Option<String>,

    pub text: String,

    pub is_bot: bool,
}

impl InboundMessage {
    /// A human message posted directly in a channel
    pub fn new(
        message_id: &str,
        author_id: &str,
        author_display_name: &str,
        channel_id: &str,
        text: &str,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            author_id: author_id.to_string(),
            author_display_name: author_display_name.to_string(),
            channel_id: channel_id.to_string(),
            parent_id: None,
            text: text.to_string(),
            is_bot: false,
        }
    }

    /// Mark the message as posted inside a thread of `parent_id`
    pub fn in_thread(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn from_bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.author_id.clone(),
            display_name: self.author_display_name.clone(),
        }
    }
}

/// The person asking for a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub display_name: String,
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.user_id)
    }
}

/// Transport trait - the chat platform as seen by the bridge
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a private, non-invitable sub-channel under `parent_id` and add `invitee`.
    /// Returns the new channel ID.
    async fn create_private_subchannel(
        &self,
        parent_id: &str,
        name: &str,
        invitee: &str,
    ) -> Result<String, TransportError>;

    /// Post `text` to a channel, returning the message ID
    async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError>;

    /// Post `text` as a reply to `message_id`, returning the new message ID
    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, TransportError>;

    /// Look up a channel
    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, TransportError>;
}
