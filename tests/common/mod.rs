//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use threadbridge::backend::{Role, RunError, RunSnapshot};
use threadbridge::channels::{ChannelInfo, ChannelKind};
use threadbridge::{
    AssistantBackend, AssistantRelay, BackendError, Dispatcher, DispatcherConfig, InboundMessage,
    MapStore, RunOrchestrator, RunPolicy, RunStatus, SessionRouter, TopicRegistry, Transport,
    TransportError,
};

pub const LOBBY: &str = "C1";

/// A message the bot posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub channel_id: String,
    pub reply_to: Option<String>,
    pub text: String,
}

/// Discord stand-in: threads live in a map, every post lands in the outbox
#[derive(Default)]
pub struct FakeTransport {
    channels: Mutex<HashMap<String, ChannelInfo>>,
    outbox: Mutex<Vec<Sent>>,
    created: AtomicUsize,
    sends: AtomicUsize,
    pub fail_create: AtomicBool,
    /// Panic inside thread creation
    pub panic_create: AtomicBool,
    /// 1-based index of the `send` call that fails; 0 never fails
    pub fail_send_at: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delete_channel(&self, id: &str) {
        self.channels.lock().remove(id);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn outbox(&self) -> Vec<Sent> {
        self.outbox.lock().clone()
    }

    /// Texts posted to `channel_id`, oldest first
    pub fn texts_in(&self, channel_id: &str) -> Vec<String> {
        self.outbox
            .lock()
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .map(|s| s.text.clone())
            .collect()
    }

    fn record(&self, channel_id: &str, reply_to: Option<&str>, text: &str) -> String {
        let mut outbox = self.outbox.lock();
        outbox.push(Sent {
            channel_id: channel_id.to_string(),
            reply_to: reply_to.map(str::to_string),
            text: text.to_string(),
        });
        format!("M{}", outbox.len())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn create_private_subchannel(
        &self,
        parent_id: &str,
        _name: &str,
        _invitee: &str,
    ) -> Result<String, TransportError> {
        if self.panic_create.load(Ordering::SeqCst) {
            panic!("thread creation blew up");
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("T{}", n);
        self.channels.lock().insert(
            id.clone(),
            ChannelInfo {
                id: id.clone(),
                parent_id: Some(parent_id.to_string()),
                kind: ChannelKind::PrivateThread,
                created_at: None,
            },
        );
        Ok(id)
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<String, TransportError> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_send_at.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 500,
                body: "send failed".to_string(),
            });
        }
        Ok(self.record(channel_id, None, text))
    }

    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, TransportError> {
        Ok(self.record(channel_id, Some(message_id), text))
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, TransportError> {
        self.channels
            .lock()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(channel_id.to_string()))
    }
}

/// Assistants stand-in: every run walks through `script`, then sits on its last status
pub struct ScriptedBackend {
    sessions: AtomicUsize,
    runs: AtomicUsize,
    script: Vec<RunStatus>,
    pending: Mutex<VecDeque<RunStatus>>,
    pub error: Mutex<Option<RunError>>,
    pub output: Mutex<String>,
    pub appended: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub fn new(script: &[RunStatus], output: &str) -> Arc<Self> {
        Arc::new(Self {
            sessions: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            script: script.to_vec(),
            pending: Mutex::new(VecDeque::new()),
            error: Mutex::new(None),
            output: Mutex::new(output.to_string()),
            appended: Mutex::new(Vec::new()),
        })
    }

    /// queued -> in_progress -> completed
    pub fn answering(output: &str) -> Arc<Self> {
        Self::new(&[RunStatus::InProgress, RunStatus::Completed], output)
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn snapshot(&self, status: RunStatus) -> RunSnapshot {
        RunSnapshot {
            run_id: format!("R{}", self.runs.load(Ordering::SeqCst)),
            status,
            error: if status == RunStatus::Failed {
                self.error.lock().clone()
            } else {
                None
            },
        }
    }
}

#[async_trait]
impl AssistantBackend for ScriptedBackend {
    async fn create_session(&self) -> Result<String, BackendError> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("S{}", n))
    }

    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
    ) -> Result<(), BackendError> {
        assert_eq!(role, Role::User);
        self.appended
            .lock()
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn start_run(&self, _session_id: &str, _assistant_ref: &str) -> Result<RunSnapshot, BackendError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self.pending.lock() = self.script.iter().copied().collect();
        Ok(self.snapshot(RunStatus::Queued))
    }

    async fn get_run_status(&self, _session_id: &str, _run_id: &str) -> Result<RunSnapshot, BackendError> {
        let mut pending = self.pending.lock();
        let status = if pending.len() > 1 {
            pending.pop_front().unwrap_or(RunStatus::InProgress)
        } else {
            pending.front().copied().unwrap_or(RunStatus::InProgress)
        };
        drop(pending);
        Ok(self.snapshot(status))
    }

    async fn get_latest_output(&self, _session_id: &str) -> Result<String, BackendError> {
        Ok(self.output.lock().clone())
    }
}

/// Dispatcher over the Assistants flow with the given stores
pub fn assistant_bridge(
    transport: Arc<FakeTransport>,
    backend: Arc<ScriptedBackend>,
    user_topics: Arc<dyn MapStore>,
    session_map: Arc<dyn MapStore>,
) -> Dispatcher {
    let config = DispatcherConfig::new(LOBBY);
    let topics = TopicRegistry::new(
        user_topics,
        transport.clone(),
        LOBBY,
        chrono_tz::America::Sao_Paulo,
    );
    let sessions = SessionRouter::new(
        session_map,
        backend.clone(),
        transport.clone(),
        &config.notices.session_ready,
    );
    let orchestrator = RunOrchestrator::new(backend, "asst_test", RunPolicy::default());
    let relay = Arc::new(AssistantRelay::new(sessions, orchestrator));
    Dispatcher::new(config, transport, topics, relay)
}

pub fn lobby_message(id: &str, user_id: &str, text: &str) -> InboundMessage {
    InboundMessage::new(id, user_id, "Ana", LOBBY, text)
}

pub fn topic_message(id: &str, user_id: &str, topic_id: &str, text: &str) -> InboundMessage {
    InboundMessage::new(id, user_id, "Ana", topic_id, text).in_thread(LOBBY)
}
