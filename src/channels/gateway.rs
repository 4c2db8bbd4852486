//! Discord Gateway
//!
//! Holds the websocket connection to Discord, keeps it alive with heartbeats, and turns
//! `MESSAGE_CREATE` dispatches into `InboundMessage`s on an mpsc channel. Thread events
//! feed the `ChannelDirectory` so parent lookups rarely hit the REST API.

use super::directory::ChannelDirectory;
use super::discord::DiscordChannelPayload;
use super::traits::InboundMessage;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS(1) | GUILD_MEMBERS(2) | GUILD_MESSAGES(512) | MESSAGE_CONTENT(32768)
pub const DEFAULT_INTENTS: u64 = 1 | 2 | 512 | 32768;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Gateway connection settings
#[derive(Clone)]
pub struct GatewayConfig {
    pub bot_token: String,
    pub url: String,
    pub intents: u64,
}

impl GatewayConfig {
    pub fn new(bot_token: &str) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            url: DISCORD_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
        }
    }
}

/// How a single connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Server closed or asked us to reconnect
    Reconnect,
    /// Nobody is listening for messages anymore
    SinkClosed,
}

pub struct Gateway {
    config: GatewayConfig,
    directory: Arc<ChannelDirectory>,
    sink: mpsc::Sender<InboundMessage>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        directory: Arc<ChannelDirectory>,
        sink: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            config,
            directory,
            sink,
        }
    }

    /// Connect and reconnect until the receiving side of the sink is dropped
    pub async fn run(self) {
        loop {
            match self.connect_once().await {
                Ok(Disconnect::SinkClosed) => {
                    info!("Message sink closed, gateway stopping");
                    return;
                }
                Ok(Disconnect::Reconnect) => {
                    info!("Gateway disconnected, reconnecting in {}s", RECONNECT_DELAY.as_secs());
                }
                Err(e) => {
                    error!("Gateway error: {:#}, reconnecting in {}s", e, RECONNECT_DELAY.as_secs());
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self) -> Result<Disconnect> {
        let (mut ws, _) = connect_async(self.config.url.as_str())
            .await
            .context("failed to connect to Discord Gateway")?;
        info!("Connected to Discord Gateway");

        // Hello (opcode 10) carries the heartbeat interval
        let hello = read_next_text(&mut ws).await?;
        let hello: GatewayEvent = serde_json::from_str(&hello).context("failed to parse Hello")?;
        let heartbeat_ms = hello
            .d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(|v| v.as_u64())
            .unwrap_or(41250);
        debug!("Received Hello, heartbeat every {}ms", heartbeat_ms);

        let identify = json!({
            "op": 2,
            "d": {
                "token": self.config.bot_token,
                "intents": self.config.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "threadbridge",
                    "device": "threadbridge"
                }
            }
        });
        ws.send(WsMessage::Text(identify.to_string().into())).await?;

        let mut sequence: Option<u64> = None;
        let mut heartbeat = interval(Duration::from_millis(heartbeat_ms));
        // First tick fires immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let hb = json!({ "op": 1, "d": sequence });
                    ws.send(WsMessage::Text(hb.to_string().into())).await?;
                    debug!("Sent heartbeat");
                }
                frame = ws.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Ping(data))) => {
                            ws.send(WsMessage::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!("Gateway closed by server: {:?}", frame);
                            return Ok(Disconnect::Reconnect);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(anyhow::anyhow!("WebSocket error: {e}")),
                        None => return Ok(Disconnect::Reconnect),
                    };

                    let event: GatewayEvent = match serde_json::from_str(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Failed to parse gateway event: {}", e);
                            continue;
                        }
                    };
                    if let Some(s) = event.s {
                        sequence = Some(s);
                    }

                    match event.op {
                        0 => {
                            if let Some(t) = event.t.as_deref() {
                                if self.dispatch(t, event.d).await.is_err() {
                                    return Ok(Disconnect::SinkClosed);
                                }
                            }
                        }
                        1 => {
                            let hb = json!({ "op": 1, "d": sequence });
                            ws.send(WsMessage::Text(hb.to_string().into())).await?;
                        }
                        7 => {
                            info!("Discord requested reconnect");
                            return Ok(Disconnect::Reconnect);
                        }
                        9 => {
                            warn!("Invalid session, reconnecting");
                            return Ok(Disconnect::Reconnect);
                        }
                        11 => debug!("Heartbeat ACK"),
                        op => debug!("Unhandled opcode {}", op),
                    }
                }
            }
        }
    }

    /// Handle one dispatch event. Errs only when the sink is closed.
    async fn dispatch(&self, event_type: &str, data: Option<Value>) -> Result<(), SinkClosed> {
        let Some(data) = data else {
            return Ok(());
        };

        match event_type {
            "READY" => {
                let user = data
                    .get("user")
                    .and_then(|u| u.get("username"))
                    .and_then(|u| u.as_str())
                    .unwrap_or("unknown");
                info!("Discord bot is READY as {}", user);
            }
            "GUILD_CREATE" => {
                // Active threads arrive with the guild
                if let Some(threads) = data.get("threads").and_then(|t| t.as_array()) {
                    for thread in threads {
                        self.remember_channel(thread.clone()).await;
                    }
                }
            }
            "THREAD_CREATE" | "THREAD_UPDATE" | "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                self.remember_channel(data).await;
            }
            "THREAD_DELETE" | "CHANNEL_DELETE" => {
                if let Some(id) = data.get("id").and_then(|v| v.as_str()) {
                    self.directory.forget(id).await;
                }
            }
            "MESSAGE_CREATE" => match parse_message_create(data) {
                Ok(message) => {
                    if self.sink.is_closed() {
                        return Err(SinkClosed);
                    }
                    // A directory miss goes to REST; the heartbeat loop must not wait on it
                    let directory = self.directory.clone();
                    let sink = self.sink.clone();
                    tokio::spawn(async move {
                        let mut message = message;
                        message.parent_id = directory.parent_of(&message.channel_id).await;
                        debug!(
                            "Inbound message {} in {} (parent {:?})",
                            message.message_id, message.channel_id, message.parent_id
                        );
                        if sink.send(message).await.is_err() {
                            debug!("Message sink closed, dropping inbound message");
                        }
                    });
                }
                Err(e) => warn!("Skipping malformed MESSAGE_CREATE: {}", e),
            },
            other => debug!("Ignoring dispatch {}", other),
        }
        Ok(())
    }

    async fn remember_channel(&self, data: Value) {
        match serde_json::from_value::<DiscordChannelPayload>(data) {
            Ok(channel) => self.directory.remember(&channel.id, channel.parent_id).await,
            Err(e) => debug!("Ignoring channel payload: {}", e),
        }
    }
}

#[derive(Debug)]
struct SinkClosed;

/// Translate a `MESSAGE_CREATE` payload. `parent_id` is left for the directory to fill.
pub fn parse_message_create(data: Value) -> Result<InboundMessage, serde_json::Error> {
    let payload: MessageCreate = serde_json::from_value(data)?;

    let display_name = payload
        .member
        .and_then(|m| m.nick)
        .or(payload.author.global_name)
        .unwrap_or_else(|| payload.author.username.clone());

    Ok(InboundMessage {
        message_id: payload.id,
        author_id: payload.author.id,
        author_display_name: display_name,
        channel_id: payload.channel_id,
        parent_id: None,
        text: payload.content,
        is_bot: payload.author.bot,
    })
}

async fn read_next_text(ws: &mut WsStream) -> Result<String> {
    while let Some(frame) = ws.next().await {
        match frame? {
            WsMessage::Text(text) => return Ok(text.as_str().to_string()),
            WsMessage::Close(frame) => {
                return Err(anyhow::anyhow!("WebSocket closed: {frame:?}"));
            }
            _ => continue,
        }
    }
    Err(anyhow::anyhow!("WebSocket stream ended"))
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: Author,
    #[serde(default)]
    member: Option<Member>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    nick: Option<String>,
}
