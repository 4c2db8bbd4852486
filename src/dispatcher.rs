//! Message Dispatcher
//!
//! Entry point for every inbound message. Filters on the authorized channel, routes lobby
//! messages to the topic registry and topic messages to the relay, and turns any failure
//! into a single "busy" notice.

use crate::channels::{InboundMessage, Transport};
use crate::chunker::{self, DISCORD_MESSAGE_LIMIT};
use crate::config::Notices;
use crate::error::Result;
use crate::orchestrator::RunOutcome;
use crate::relay::Relay;
use crate::topics::{TopicRegistry, TopicResolution};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub authorized_channel_id: String,
    pub chunk_limit: usize,
    pub notices: Notices,
}

impl DispatcherConfig {
    pub fn new(authorized_channel_id: &str) -> Self {
        Self {
            authorized_channel_id: authorized_channel_id.to_string(),
            chunk_limit: DISCORD_MESSAGE_LIMIT,
            notices: Notices::default(),
        }
    }
}

/// Where an inbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ignore,
    /// Posted in the authorized channel itself
    Lobby,
    /// Posted in a thread under the authorized channel
    Topic,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    topics: TopicRegistry,
    relay: Arc<dyn Relay>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        topics: TopicRegistry,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            config,
            transport,
            topics,
            relay,
        }
    }

    pub fn route(&self, msg: &InboundMessage) -> Route {
        let authorized = self.config.authorized_channel_id.as_str();
        if msg.is_bot {
            Route::Ignore
        } else if msg.channel_id == authorized {
            Route::Lobby
        } else if msg.parent_id.as_deref() == Some(authorized) {
            Route::Topic
        } else {
            Route::Ignore
        }
    }

    /// Handle one message. Never fails: errors are logged and answered with the busy notice.
    pub async fn handle(&self, msg: InboundMessage) {
        let route = self.route(&msg);
        if route == Route::Ignore {
            return;
        }

        let span = info_span!(
            "message",
            request_id = %Uuid::new_v4(),
            channel = %msg.channel_id,
            author = %msg.author_id,
        );

        async {
            let result = match route {
                Route::Lobby => self.handle_lobby(&msg).await,
                Route::Topic => self.handle_topic(&msg).await,
                Route::Ignore => Ok(()),
            };

            if let Err(e) = result {
                error!("Failed to handle message {}: {}", msg.message_id, e);
                self.send_busy(route, &msg).await;
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_lobby(&self, msg: &InboundMessage) -> Result<()> {
        let requester = msg.requester();
        let resolution = self.topics.resolve_or_create(&requester).await?;
        let notices = &self.config.notices;

        match &resolution {
            TopicResolution::Created(topic) => {
                self.transport
                    .reply(&msg.channel_id, &msg.message_id, &notices.created_in(&topic.topic_id))
                    .await?;
                if let Err(e) = self.transport.send(&topic.topic_id, &notices.topic_welcome).await {
                    warn!("Could not welcome {} in {}: {}", requester, topic.topic_id, e);
                }
            }
            TopicResolution::Resumed(topic) => {
                self.transport
                    .reply(&msg.channel_id, &msg.message_id, &notices.resumed_in(&topic.topic_id))
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_topic(&self, msg: &InboundMessage) -> Result<()> {
        if msg.text.trim().is_empty() {
            debug!("Ignoring empty message {}", msg.message_id);
            return Ok(());
        }

        let topic_id = msg.channel_id.as_str();
        let notices = &self.config.notices;
        let key = self.relay.prepare(topic_id, &msg.author_id).await?;

        if let Err(e) = self.transport.send(topic_id, &notices.processing).await {
            warn!("Could not send processing notice to {}: {}", topic_id, e);
        }

        match self.relay.respond(&key, &msg.text).await? {
            RunOutcome::Completed(text) => {
                let text = if text.trim().is_empty() {
                    notices.empty_response.as_str()
                } else {
                    text.as_str()
                };
                self.send_long_message(topic_id, text).await?;
            }
            RunOutcome::Failed(failure) => {
                info!("Reporting failed run {} ({})", failure.run_id, failure.status);
                self.transport.send(topic_id, &notices.run_failed).await?;
            }
            RunOutcome::TimedOut => {
                self.transport.send(topic_id, &notices.timed_out).await?;
            }
        }
        Ok(())
    }

    /// Send `text` as consecutive messages within the platform's length limit.
    ///
    /// Only a failure on the first chunk is an error. Once part of the answer is out, a
    /// later failure stops delivery and is logged; a busy notice would contradict it.
    async fn send_long_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let chunks = chunker::split(text, self.config.chunk_limit);
        let total = chunks.len();
        debug!("Sending {} chunk(s) to {}", total, channel_id);
        for (i, chunk) in chunks.into_iter().enumerate() {
            match self.transport.send(channel_id, chunk).await {
                Ok(_) => {}
                Err(e) if i == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Answer in {} cut short after {}/{} chunks: {}",
                        channel_id, i, total, e
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Answer `msg` with the busy notice, in the lobby as a reply, in a topic as a post
    pub async fn report_busy(&self, msg: &InboundMessage) {
        let route = self.route(msg);
        if route != Route::Ignore {
            self.send_busy(route, msg).await;
        }
    }

    async fn send_busy(&self, route: Route, msg: &InboundMessage) {
        let busy = &self.config.notices.busy;
        let sent = match route {
            Route::Lobby => {
                self.transport
                    .reply(&msg.channel_id, &msg.message_id, busy)
                    .await
            }
            _ => self.transport.send(&msg.channel_id, busy).await,
        };
        if let Err(e) = sent {
            warn!("Could not send busy notice to {}: {}", msg.channel_id, e);
        }
    }
}
