//! threadbridge - Entry Point

use threadbridge::config::LogFormat;
use threadbridge::{preflight, Config};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("threadbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = Config::from_env()?;
    init_logging(config.log_format)?;

    let checks = preflight::check(&config);
    if !checks.warnings.is_empty() {
        warn!("{}", checks.format_warnings().trim_end());
    }
    if !checks.ready {
        error!("{}", checks.format_error().trim_end());
        anyhow::bail!("preflight checks failed");
    }

    info!("threadbridge v{}", env!("CARGO_PKG_VERSION"));
    threadbridge::bot::run_bot(config).await
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => builder.with_ansi(true).try_init(),
        LogFormat::Json => builder.with_ansi(false).json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
}

fn print_help() {
    println!("threadbridge v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: threadbridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --help, -h         Show this help");
    println!("  --version, -V      Show version");
    println!();
    println!("Environment variables:");
    println!("  DISCORD_TOKEN            Discord bot token (DISCORD_BOT_TOKEN also accepted)");
    println!("  OPENAI_API_KEY           OpenAI API key");
    println!("  OPENAI_ASSISTANT_ID      Assistant used for runs");
    println!("  AUTHORIZED_CHANNEL_ID    Channel the bot listens in");
    println!("  BRIDGE_DATA_DIR          Mapping files directory (default: /data)");
    println!("  BRIDGE_TIMEZONE          Topic name timezone (default: America/Sao_Paulo)");
    println!("  BRIDGE_BACKEND           assistants | chat (default: assistants)");
    println!("  OPENAI_MODEL             Chat backend model (default: gpt-4o-mini)");
    println!("  BRIDGE_SYSTEM_PROMPT     Chat backend system prompt");
    println!("  OPENAI_BASE_URL          API base (default: https://api.openai.com/v1)");
    println!("  BRIDGE_POLL_INTERVAL_MS  Run poll interval (default: 1500)");
    println!("  BRIDGE_RUN_TIMEOUT_SECS  Reply timeout (default: 60)");
    println!("  BRIDGE_HISTORY_LIMIT     Chat backend turns kept (default: 50)");
    println!("  BRIDGE_LOG_FORMAT        json for JSON logs");
    println!("  RUST_LOG                 Log filter (default: info)");
}
