//! threadbridge
//!
//! Discord ⇄ OpenAI bridge. Watches one authorized channel, gives each user a private
//! thread (a "topic") on first contact, and relays messages in that topic to an OpenAI
//! assistant session.
//!
//! # Architecture
//!
//! ```text
//! Discord Gateway ──► Dispatcher ──┬── lobby ──► TopicRegistry ──► reply with <#topic>
//!   (websocket)      (access       │
//!                     filter)      └── topic ──► Relay ──► SessionRouter ──► RunOrchestrator
//!                                                  │                            │
//!                                                  └─────── Chunker ◄───────────┘
//!
//! Persistence: user_topics.json, thread_map.json, histories.json (JSON, atomic rewrite)
//! ```

pub mod backend;
pub mod bot;
pub mod channels;
pub mod chunker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod locks;
pub mod orchestrator;
pub mod preflight;
pub mod relay;
pub mod sessions;
pub mod store;
pub mod topics;

pub use backend::{AssistantBackend, BackendError, CompletionBackend, RunStatus, Turn};
pub use channels::{InboundMessage, Transport, TransportError};
pub use config::{BackendKind, Config, Notices};
pub use dispatcher::{Dispatcher, DispatcherConfig, Route};
pub use error::BridgeError;
pub use history::HistoryStore;
pub use orchestrator::{Clock, RunOrchestrator, RunOutcome, RunPolicy, TokioClock};
pub use relay::{AssistantRelay, ChatRelay, Relay};
pub use sessions::SessionRouter;
pub use store::{JsonMapStore, MapStore, MemoryMapStore, StoreError};
pub use topics::{Topic, TopicRegistry, TopicResolution};
