//! Bot runtime: wires configuration, stores, backend and Discord together and runs the
//! gateway loop until Ctrl-C.

use crate::backend::{OpenAiAssistants, OpenAiChat};
use crate::channels::{
    ChannelDirectory, DiscordConfig, DiscordTransport, Gateway, GatewayConfig, InboundMessage,
    Transport,
};
use crate::config::{BackendKind, Config};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::history::HistoryStore;
use crate::orchestrator::{RunOrchestrator, RunPolicy};
use crate::relay::{AssistantRelay, ChatRelay, Relay};
use crate::sessions::SessionRouter;
use crate::store::JsonMapStore;
use crate::topics::TopicRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Inbound messages buffered between the gateway and the dispatcher
const INBOUND_BUFFER: usize = 256;

/// Build the dispatcher for `config` on top of `transport`
pub fn build_dispatcher(config: &Config, transport: Arc<dyn Transport>) -> Result<Dispatcher> {
    let user_topics = JsonMapStore::open(config.user_topics_path())
        .context("failed to load user topics")?;
    let topics = TopicRegistry::new(
        Arc::new(user_topics),
        transport.clone(),
        &config.authorized_channel_id,
        config.timezone,
    );

    let relay: Arc<dyn Relay> = match config.backend {
        BackendKind::Assistants => {
            let backend = Arc::new(OpenAiAssistants::with_base_url(
                &config.openai_api_key,
                &config.openai_base_url,
            ));
            let session_map = JsonMapStore::open(config.session_map_path())
                .context("failed to load session map")?;
            let sessions = SessionRouter::new(
                Arc::new(session_map),
                backend.clone(),
                transport.clone(),
                &config.notices.session_ready,
            );
            let orchestrator = RunOrchestrator::new(
                backend,
                &config.assistant_id,
                RunPolicy {
                    poll_interval: config.poll_interval,
                    timeout: config.run_timeout,
                },
            );
            Arc::new(AssistantRelay::new(sessions, orchestrator))
        }
        BackendKind::Chat => {
            let backend = OpenAiChat::with_base_url(
                &config.openai_api_key,
                &config.model,
                &config.openai_base_url,
            )
            .with_system_prompt(config.system_prompt.clone());
            let history = HistoryStore::open_with_limit(&config.history_path(), config.history_limit)
                .context("failed to load conversation history")?;
            Arc::new(ChatRelay::new(Arc::new(backend), history, config.run_timeout))
        }
    };

    let dispatcher_config = DispatcherConfig {
        notices: config.notices.clone(),
        ..DispatcherConfig::new(&config.authorized_channel_id)
    };
    Ok(Dispatcher::new(dispatcher_config, transport, topics, relay))
}

/// Handle `msg` on its own task. A panicking handler is logged and answered with the
/// busy notice, so one bad message never goes unanswered or takes the loop down.
pub fn spawn_handler(dispatcher: Arc<Dispatcher>, msg: InboundMessage) -> JoinHandle<()> {
    tokio::spawn(async move {
        let inner = {
            let dispatcher = dispatcher.clone();
            let msg = msg.clone();
            tokio::spawn(async move { dispatcher.handle(msg).await })
        };
        if let Err(e) = inner.await {
            if e.is_panic() {
                error!("Handler for message {} panicked", msg.message_id);
                dispatcher.report_busy(&msg).await;
            }
        }
    })
}

/// Run the bot until Ctrl-C
pub async fn run_bot(config: Config) -> Result<()> {
    info!("===========================================");
    info!("  threadbridge v{} - Starting...", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!("Authorized channel: {}", config.authorized_channel_id);
    info!("Backend: {:?}", config.backend);
    info!("Data directory: {}", config.data_dir.display());

    let discord = Arc::new(DiscordTransport::new(DiscordConfig::new(&config.discord_token)));
    let me = discord
        .current_user()
        .await
        .context("failed to verify Discord token")?;
    info!("Logged in as {} ({})", me.username, me.id);

    let transport: Arc<dyn Transport> = discord;
    let dispatcher = Arc::new(build_dispatcher(&config, transport.clone())?);
    let directory = Arc::new(ChannelDirectory::new(transport));

    let (tx, mut rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER);
    let gateway = Gateway::new(GatewayConfig::new(&config.discord_token), directory, tx);
    let gateway_task = tokio::spawn(gateway.run());

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    warn!("Gateway stopped");
                    break;
                };
                spawn_handler(dispatcher.clone(), msg);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    gateway_task.abort();
    info!("threadbridge stopped");
    Ok(())
}
