//! Channel Directory
//!
//! Caches which parent channel a thread belongs to. Gateway message events carry only
//! the channel ID, so the access filter needs this lookup for every thread message.
//! Thread events prime the cache; misses fall back to the REST API.

use super::traits::{Transport, TransportError};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: u64 = 10_000;
const DEFAULT_TTL_SECS: u64 = 3600;

pub struct ChannelDirectory {
    transport: Arc<dyn Transport>,
    /// channel ID -> parent ID (None for top-level channels)
    parents: Cache<String, Option<String>>,
}

impl ChannelDirectory {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_ttl(transport, Duration::from_secs(DEFAULT_TTL_SECS))
    }

    pub fn with_ttl(transport: Arc<dyn Transport>, ttl: Duration) -> Self {
        let parents = Cache::builder()
            .max_capacity(DEFAULT_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self { transport, parents }
    }

    /// Record a channel's parent learned from a gateway event
    pub async fn remember(&self, channel_id: &str, parent_id: Option<String>) {
        self.parents.insert(channel_id.to_string(), parent_id).await;
    }

    /// Drop a channel, e.g. after a thread delete event
    pub async fn forget(&self, channel_id: &str) {
        self.parents.invalidate(channel_id).await;
    }

    /// Parent of `channel_id`, or None if it is top-level or cannot be resolved
    pub async fn parent_of(&self, channel_id: &str) -> Option<String> {
        if let Some(parent) = self.parents.get(channel_id).await {
            return parent;
        }

        match self.transport.fetch_channel(channel_id).await {
            Ok(info) => {
                debug!("Resolved channel {} -> parent {:?}", channel_id, info.parent_id);
                self.parents
                    .insert(channel_id.to_string(), info.parent_id.clone())
                    .await;
                info.parent_id
            }
            Err(TransportError::NotFound(_)) | Err(TransportError::PermissionDenied(_)) => {
                // Invisible to the bot: remember that so we stop asking
                self.parents.insert(channel_id.to_string(), None).await;
                None
            }
            Err(e) => {
                warn!("Could not resolve parent of channel {}: {}", channel_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::traits::{ChannelInfo, ChannelKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn create_private_subchannel(
            &self,
            _parent_id: &str,
            _name: &str,
            _invitee: &str,
        ) -> Result<String, TransportError> {
            unreachable!()
        }

        async fn send(&self, _channel_id: &str, _text: &str) -> Result<String, TransportError> {
            unreachable!()
        }

        async fn reply(
            &self,
            _channel_id: &str,
            _message_id: &str,
            _text: &str,
        ) -> Result<String, TransportError> {
            unreachable!()
        }

        async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if channel_id == "gone" {
                return Err(TransportError::NotFound(channel_id.to_string()));
            }
            Ok(ChannelInfo {
                id: channel_id.to_string(),
                parent_id: Some("lobby".to_string()),
                kind: ChannelKind::PrivateThread,
                created_at: None,
            })
        }
    }

    #[tokio::test]
    async fn test_lookup_is_cached() {
        let transport = Arc::new(CountingTransport {
            fetches: AtomicUsize::new(0),
        });
        let directory = ChannelDirectory::new(transport.clone());

        assert_eq!(directory.parent_of("t1").await.as_deref(), Some("lobby"));
        assert_eq!(directory.parent_of("t1").await.as_deref(), Some("lobby"));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remembered_parent_skips_fetch() {
        let transport = Arc::new(CountingTransport {
            fetches: AtomicUsize::new(0),
        });
        let directory = ChannelDirectory::new(transport.clone());

        directory.remember("t2", Some("elsewhere".to_string())).await;
        assert_eq!(directory.parent_of("t2").await.as_deref(), Some("elsewhere"));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_channel_resolves_to_none_once() {
        let transport = Arc::new(CountingTransport {
            fetches: AtomicUsize::new(0),
        });
        let directory = ChannelDirectory::new(transport.clone());

        assert_eq!(directory.parent_of("gone").await, None);
        assert_eq!(directory.parent_of("gone").await, None);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }
}
