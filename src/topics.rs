//! Topic Registry
//!
//! One private topic (thread) per user under the authorized channel. A remembered topic is
//! revalidated on every lobby message; if it is gone or moved, a new one replaces it.

use crate::channels::{ChannelInfo, Requester, Transport, TransportError};
use crate::error::Result;
use crate::locks::KeyedLocks;
use crate::store::MapStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

pub use crate::channels::discord::THREAD_NAME_LIMIT;

/// A user's private topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub topic_id: String,
    pub owner_user_id: String,
    pub parent_channel_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicResolution {
    /// The remembered topic is still valid
    Resumed(Topic),
    /// A new topic was created and persisted
    Created(Topic),
}

impl TopicResolution {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Resumed(topic) | Self::Created(topic) => topic,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Why a remembered topic cannot be resumed
#[derive(Debug, thiserror::Error)]
pub enum StaleTopic {
    #[error("topic no longer exists")]
    NotFound,

    #[error("topic is not visible to the bot")]
    PermissionDenied,

    #[error("topic belongs to {0:?}, not the authorized channel")]
    WrongParent(Option<String>),

    #[error("topic lookup failed: {0}")]
    Transport(TransportError),
}

pub struct TopicRegistry {
    /// user_id -> topic_id
    store: Arc<dyn MapStore>,
    transport: Arc<dyn Transport>,
    authorized_channel_id: String,
    timezone: Tz,
    locks: KeyedLocks,
}

impl TopicRegistry {
    pub fn new(
        store: Arc<dyn MapStore>,
        transport: Arc<dyn Transport>,
        authorized_channel_id: &str,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            transport,
            authorized_channel_id: authorized_channel_id.to_string(),
            timezone,
            locks: KeyedLocks::new(),
        }
    }

    /// Resume the requester's topic if it is still valid, otherwise create a new one.
    ///
    /// Serialized per user, so two near-simultaneous first messages yield one topic.
    /// On failure nothing is persisted.
    pub async fn resolve_or_create(&self, requester: &Requester) -> Result<TopicResolution> {
        let _guard = self.locks.lock(&requester.user_id).await;

        if let Some(topic_id) = self.store.get(&requester.user_id) {
            match self.revalidate(&topic_id).await {
                Ok(info) => {
                    info!("Resuming topic {} for {}", topic_id, requester);
                    return Ok(TopicResolution::Resumed(Topic {
                        topic_id,
                        owner_user_id: requester.user_id.clone(),
                        parent_channel_id: self.authorized_channel_id.clone(),
                        created_at: info.created_at,
                    }));
                }
                Err(reason) => {
                    warn!(
                        "Topic {} for {} is stale ({}), creating a new one",
                        topic_id, requester, reason
                    );
                }
            }
        }

        let now = Utc::now();
        let name = topic_name(&requester.display_name, now.with_timezone(&self.timezone));
        let topic_id = self
            .transport
            .create_private_subchannel(&self.authorized_channel_id, &name, &requester.user_id)
            .await?;

        self.store.put(&requester.user_id, &topic_id)?;
        info!("Created topic {} ({:?}) for {}", topic_id, name, requester);

        Ok(TopicResolution::Created(Topic {
            topic_id,
            owner_user_id: requester.user_id.clone(),
            parent_channel_id: self.authorized_channel_id.clone(),
            created_at: Some(now),
        }))
    }

    /// Check that `topic_id` still exists and hangs off the authorized channel
    pub async fn revalidate(&self, topic_id: &str) -> Result<ChannelInfo, StaleTopic> {
        let info = match self.transport.fetch_channel(topic_id).await {
            Ok(info) => info,
            Err(TransportError::NotFound(_)) => return Err(StaleTopic::NotFound),
            Err(TransportError::PermissionDenied(_)) => return Err(StaleTopic::PermissionDenied),
            Err(e) => return Err(StaleTopic::Transport(e)),
        };

        if info.parent_id.as_deref() != Some(self.authorized_channel_id.as_str()) {
            return Err(StaleTopic::WrongParent(info.parent_id));
        }
        Ok(info)
    }
}

/// `"User: <name> • dd/mm HH:MM"`, cut to the platform's thread name limit
pub fn topic_name(display_name: &str, at: DateTime<Tz>) -> String {
    let name = format!("User: {} • {}", display_name, at.format("%d/%m %H:%M"));
    if name.chars().count() <= THREAD_NAME_LIMIT {
        return name;
    }
    name.chars().take(THREAD_NAME_LIMIT).collect()
}
