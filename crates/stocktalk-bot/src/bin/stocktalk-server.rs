//! stocktalk webhook server
//!
//! # Usage
//!
//! ```bash
//! # Local run with deterministic providers and logged replies
//! cargo run --bin stocktalk-server -- serve --dev
//!
//! # Production-shaped run; replies go to the messaging API
//! export STOCKTALK_CHANNEL_SECRET="..."
//! export STOCKTALK_CHANNEL_TOKEN="..."
//! cargo run --bin stocktalk-server
//! ```
//!
//! Market data, AI generation and web search ship as deterministic dev
//! backends; a deployment supplies real providers by wiring its own binary
//! around [`stocktalk_bot::Orchestrator`].

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use stocktalk_bot::channel::{MessagingClient, PushPort, ReplyPort};
use stocktalk_bot::dev::{LoggingReplyPort, dev_orchestrator};
use stocktalk_bot::server;
use stocktalk_core::{AppConfig, logging};

const LOG_DIRECTIVES: &str =
    "info,stocktalk_bot=debug,stocktalk_core=debug,stocktalk_state=debug,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "stocktalk-server", version, about = "Chat-driven stock analysis bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the webhook server (default).
    Serve {
        /// Log outbound replies instead of calling the messaging API
        #[arg(long)]
        dev: bool,
    },
    /// Validate configuration and exit.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing(LOG_DIRECTIVES);
    install_panic_hook();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve { dev: false }) {
        Command::Serve { dev } => serve(dev).await,
        Command::Doctor => doctor(),
    }
}

async fn serve(dev: bool) -> anyhow::Result<()> {
    let (config, reply_port, push_port): (AppConfig, Arc<dyn ReplyPort>, Option<Arc<dyn PushPort>>) =
        if dev {
            let config = AppConfig::builder()
                .channel_secret("dev-secret")
                .channel_token("dev-token")
                .build()?;
            info!("dev mode: replies are logged; sign webhook bodies with 'dev-secret'");
            let port = Arc::new(LoggingReplyPort);
            (config, port.clone(), Some(port))
        } else {
            let config = AppConfig::from_env()?;
            let client = Arc::new(MessagingClient::new(
                &config.messaging_api_base,
                &config.channel_token,
            )?);
            (config, client.clone(), Some(client))
        };

    info!(
        bind_addr = %config.bind_addr,
        messaging_api_base = %config.messaging_api_base,
        discussion_cap = config.discussion_cap,
        task_stale_after_secs = config.task_stale_after.as_secs(),
        "configuration loaded"
    );

    let orchestrator = Arc::new(dev_orchestrator(config.clone(), reply_port, push_port));
    server::serve(&config.bind_addr, orchestrator).await
}

fn doctor() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        messaging_api_base = %config.messaging_api_base,
        subject_cache_ttl_secs = config.subject_cache_ttl.as_secs(),
        recommend_cache_ttl_secs = config.recommend_cache_ttl.as_secs(),
        session_ttl_secs = config.session_ttl.as_secs(),
        discussion_cap = config.discussion_cap,
        task_stale_after_secs = config.task_stale_after.as_secs(),
        "config ok"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(panic_location = %location, "panic captured");
        default_hook(panic_info);
    }));
}
