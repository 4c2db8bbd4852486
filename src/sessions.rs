//! Session Router
//!
//! Maps each topic to exactly one remote assistant session. Sessions are created lazily on
//! the first message in a topic; the "ready" notice is sent only by the call that created
//! the session.

use crate::backend::AssistantBackend;
use crate::channels::Transport;
use crate::error::Result;
use crate::locks::KeyedLocks;
use crate::store::MapStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SessionRouter {
    /// topic_id -> session_id
    store: Arc<dyn MapStore>,
    backend: Arc<dyn AssistantBackend>,
    transport: Arc<dyn Transport>,
    ready_notice: String,
    locks: KeyedLocks,
}

impl SessionRouter {
    pub fn new(
        store: Arc<dyn MapStore>,
        backend: Arc<dyn AssistantBackend>,
        transport: Arc<dyn Transport>,
        ready_notice: &str,
    ) -> Self {
        Self {
            store,
            backend,
            transport,
            ready_notice: ready_notice.to_string(),
            locks: KeyedLocks::new(),
        }
    }

    /// Session bound to a topic, if any
    pub fn session_for(&self, topic_id: &str) -> Option<String> {
        self.store.get(topic_id)
    }

    /// Existing session for `topic_id`, or a new one.
    ///
    /// The fast path has no side effects. Creation is serialized per topic and re-checks
    /// the map under the lock; the mapping is persisted before the ready notice goes out.
    pub async fn resolve_or_create_session(&self, topic_id: &str) -> Result<String> {
        if let Some(session_id) = self.store.get(topic_id) {
            return Ok(session_id);
        }

        let _guard = self.locks.lock(topic_id).await;
        if let Some(session_id) = self.store.get(topic_id) {
            return Ok(session_id);
        }

        let session_id = self.backend.create_session().await?;
        self.store.put(topic_id, &session_id)?;
        info!("Bound topic {} to session {}", topic_id, session_id);

        // The mapping is durable already; a lost notice is not worth failing the message
        if let Err(e) = self.transport.send(topic_id, &self.ready_notice).await {
            warn!("Could not send ready notice to {}: {}", topic_id, e);
        }

        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Role, RunSnapshot};
    use crate::channels::{ChannelInfo, TransportError};
    use crate::error::BridgeError;
    use crate::store::MemoryMapStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct SessionBackend {
        created: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AssistantBackend for SessionBackend {
        async fn create_session(&self) -> Result<String, BackendError> {
            if self.fail {
                return Err(BackendError::Malformed("down".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("S{}", n))
        }

        async fn append_turn(&self, _: &str, _: Role, _: &str) -> Result<(), BackendError> {
            unreachable!()
        }

        async fn start_run(&self, _: &str, _: &str) -> Result<RunSnapshot, BackendError> {
            unreachable!()
        }

        async fn get_run_status(&self, _: &str, _: &str) -> Result<RunSnapshot, BackendError> {
            unreachable!()
        }

        async fn get_latest_output(&self, _: &str) -> Result<String, BackendError> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct NoticeTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail_send: bool,
    }

    #[async_trait]
    impl Transport for NoticeTransport {
        async fn create_private_subchannel(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, TransportError> {
            unreachable!()
        }

        async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError> {
            if self.fail_send {
                return Err(TransportError::RateLimited(1.0));
            }
            self.sent.lock().push((channel_id.to_string(), text.to_string()));
            Ok("m".to_string())
        }

        async fn reply(&self, _: &str, _: &str, _: &str) -> Result<String, TransportError> {
            unreachable!()
        }

        async fn fetch_channel(&self, id: &str) -> Result<ChannelInfo, TransportError> {
            Err(TransportError::NotFound(id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_session_created_once_with_one_notice() {
        let store = Arc::new(MemoryMapStore::new());
        let backend = Arc::new(SessionBackend::default());
        let transport = Arc::new(NoticeTransport::default());
        let router = SessionRouter::new(store.clone(), backend.clone(), transport.clone(), "ready");

        assert_eq!(router.resolve_or_create_session("T1").await.unwrap(), "S1");
        assert_eq!(router.resolve_or_create_session("T1").await.unwrap(), "S1");

        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(store.persist_count(), 1);
        assert_eq!(
            *transport.sent.lock(),
            vec![("T1".to_string(), "ready".to_string())]
        );
        assert_eq!(router.session_for("T1").as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn test_concurrent_first_messages_share_a_session() {
        let store = Arc::new(MemoryMapStore::new());
        let backend = Arc::new(SessionBackend::default());
        let transport = Arc::new(NoticeTransport::default());
        let router = SessionRouter::new(store, backend.clone(), transport.clone(), "ready");

        let (a, b, c) = tokio::join!(
            router.resolve_or_create_session("T1"),
            router.resolve_or_create_session("T1"),
            router.resolve_or_create_session("T1"),
        );

        assert_eq!(a.unwrap(), "S1");
        assert_eq!(b.unwrap(), "S1");
        assert_eq!(c.unwrap(), "S1");
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_mapping_has_no_side_effects() {
        let store = Arc::new(MemoryMapStore::with_entries([("T1", "S7")]));
        let backend = Arc::new(SessionBackend::default());
        let transport = Arc::new(NoticeTransport::default());
        let router = SessionRouter::new(store.clone(), backend.clone(), transport.clone(), "ready");

        assert_eq!(router.resolve_or_create_session("T1").await.unwrap(), "S7");
        assert_eq!(backend.created.load(Ordering::SeqCst), 0);
        assert_eq!(store.persist_count(), 0);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_maps_nothing() {
        let store = Arc::new(MemoryMapStore::new());
        let backend = Arc::new(SessionBackend {
            fail: true,
            ..Default::default()
        });
        let router = SessionRouter::new(
            store.clone(),
            backend,
            Arc::new(NoticeTransport::default()),
            "ready",
        );

        assert!(matches!(
            router.resolve_or_create_session("T1").await,
            Err(BridgeError::Backend(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lost_ready_notice_keeps_session() {
        let store = Arc::new(MemoryMapStore::new());
        let transport = Arc::new(NoticeTransport {
            fail_send: true,
            ..Default::default()
        });
        let router = SessionRouter::new(
            store.clone(),
            Arc::new(SessionBackend::default()),
            transport,
            "ready",
        );

        assert_eq!(router.resolve_or_create_session("T1").await.unwrap(), "S1");
        assert_eq!(store.get("T1").as_deref(), Some("S1"));
    }
}
