//! Topic Relay
//!
//! What happens to a message posted inside a topic, for each backend flavor.

use crate::backend::{CompletionBackend, Turn};
use crate::error::Result;
use crate::history::HistoryStore;
use crate::orchestrator::{RunOrchestrator, RunOutcome};
use crate::sessions::SessionRouter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Relay: Send + Sync {
    /// Bind the topic to a conversation; returns the key `respond` works against
    async fn prepare(&self, topic_id: &str, author_id: &str) -> Result<String>;

    /// Submit `text` and wait for the reply
    async fn respond(&self, key: &str, text: &str) -> Result<RunOutcome>;
}

/// Assistants API: one remote session per topic, replies computed by polled runs
pub struct AssistantRelay {
    sessions: SessionRouter,
    orchestrator: RunOrchestrator,
}

impl AssistantRelay {
    pub fn new(sessions: SessionRouter, orchestrator: RunOrchestrator) -> Self {
        Self {
            sessions,
            orchestrator,
        }
    }
}

#[async_trait]
impl Relay for AssistantRelay {
    async fn prepare(&self, topic_id: &str, _author_id: &str) -> Result<String> {
        self.sessions.resolve_or_create_session(topic_id).await
    }

    async fn respond(&self, session_id: &str, text: &str) -> Result<RunOutcome> {
        Ok(self.orchestrator.run(session_id, text).await?)
    }
}

/// Chat completions: history kept locally per user and replayed on every call
pub struct ChatRelay {
    backend: Arc<dyn CompletionBackend>,
    history: HistoryStore,
    timeout: Duration,
}

impl ChatRelay {
    pub fn new(backend: Arc<dyn CompletionBackend>, history: HistoryStore, timeout: Duration) -> Self {
        Self {
            backend,
            history,
            timeout,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

#[async_trait]
impl Relay for ChatRelay {
    async fn prepare(&self, _topic_id: &str, author_id: &str) -> Result<String> {
        Ok(author_id.to_string())
    }

    async fn respond(&self, user_id: &str, text: &str) -> Result<RunOutcome> {
        let mut turns = self.history.history(user_id);
        turns.push(Turn::user(text));

        let reply = match tokio::time::timeout(self.timeout, self.backend.complete(&turns)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Completion for user {} timed out after {:?}", user_id, self.timeout);
                return Ok(RunOutcome::TimedOut);
            }
        };

        self.history.add_exchange(user_id, text, &reply)?;
        info!("Completion for user {} ({} turns)", user_id, turns.len());
        Ok(RunOutcome::Completed(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Role};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct EchoCompletion {
        seen: Mutex<Vec<Vec<Turn>>>,
        delay: Duration,
    }

    #[async_trait]
    impl CompletionBackend for EchoCompletion {
        async fn complete(&self, history: &[Turn]) -> Result<String, BackendError> {
            self.seen.lock().push(history.to_vec());
            tokio::time::sleep(self.delay).await;
            let last = history.last().map(|t| t.content.clone()).unwrap_or_default();
            Ok(format!("echo: {}", last))
        }
    }

    fn relay(dir: &TempDir, delay: Duration) -> (ChatRelay, Arc<EchoCompletion>) {
        let backend = Arc::new(EchoCompletion {
            seen: Mutex::new(Vec::new()),
            delay,
        });
        let history = HistoryStore::open(&dir.path().join("histories.json")).unwrap();
        (
            ChatRelay::new(backend.clone(), history, Duration::from_secs(60)),
            backend,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_relay_replays_history() {
        let dir = TempDir::new().unwrap();
        let (relay, backend) = relay(&dir, Duration::from_millis(5));

        let key = relay.prepare("T1", "U42").await.unwrap();
        assert_eq!(key, "U42");

        relay.respond(&key, "Hello").await.unwrap();
        let outcome = relay.respond(&key, "2+2?").await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed("echo: 2+2?".to_string()));
        let seen = backend.seen.lock();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][1].role, Role::Assistant);
        assert_eq!(relay.history().history("U42").len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_relay_times_out_without_recording() {
        let dir = TempDir::new().unwrap();
        let (relay, _) = relay(&dir, Duration::from_secs(120));

        let outcome = relay.respond("U42", "slow?").await.unwrap();

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(relay.history().history("U42").is_empty());
    }
}
