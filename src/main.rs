use clap::Parser;
use marketsweeper::config::{Settings, SCAN_INTERVAL_SECONDS, TRACK_INTERVAL_SECONDS};
use marketsweeper::engine::EngineContext;
use marketsweeper::exchange::rest::RestExchange;
use marketsweeper::exchange::{ExchangeClients, ExchangeId, MarketData};
use marketsweeper::logger::{self, LogTag};
use marketsweeper::notifications::{LogNotifier, Notification, Notifier};
use marketsweeper::trades::Database;
use std::sync::Arc;
use std::time::Duration;

/// Multi-exchange market scanner and trade engine
#[derive(Parser, Debug)]
#[command(name = "marketsweeper", version, about)]
struct Cli {
    /// Path to the settings file (created with defaults when missing)
    #[arg(long, default_value = "settings.json")]
    config: String,

    /// Path to the trades database
    #[arg(long, default_value = "trades.db")]
    database: String,

    /// Run a single scan cycle and exit
    #[arg(long)]
    scan_once: bool,

    /// Telegram bot token for notifications (requires --telegram-chat-id)
    #[arg(long)]
    telegram_token: Option<String>,

    /// Telegram chat id receiving notifications
    #[arg(long)]
    telegram_chat_id: Option<String>,

    /// Show everything including debug output
    #[arg(long)]
    verbose: bool,

    /// Suppress warnings and below
    #[arg(long)]
    quiet: bool,

    /// Comma-separated tag list restricting non-error log output
    #[arg(long)]
    log_tags: Option<String>,

    /// Per-module debug output
    #[arg(long)]
    debug_scanner: bool,
    #[arg(long)]
    debug_markets: bool,
    #[arg(long)]
    debug_strategies: bool,
    #[arg(long)]
    debug_signals: bool,
    #[arg(long)]
    debug_trades: bool,
    #[arg(long)]
    debug_exchange: bool,
    #[arg(long)]
    debug_database: bool,
    #[arg(long)]
    debug_notify: bool,
}

fn connect_exchanges() -> ExchangeClients {
    let mut clients = ExchangeClients::new();
    for exchange in ExchangeId::all() {
        match RestExchange::new(*exchange) {
            Ok(client) => {
                clients.insert(*exchange, Arc::new(client) as Arc<dyn MarketData>);
            }
            Err(e) => {
                logger::debug(
                    LogTag::Exchange,
                    &format!("Skipping {}: {}", exchange, e),
                );
            }
        }
    }
    clients
}

fn build_notifier(cli: &Cli) -> Arc<dyn Notifier> {
    #[cfg(feature = "telegram")]
    if let (Some(token), Some(chat_id)) = (&cli.telegram_token, &cli.telegram_chat_id) {
        match marketsweeper::notifications::telegram::TelegramNotifier::new(token, chat_id) {
            Ok(notifier) => {
                logger::info(LogTag::Notify, "Telegram notifications enabled");
                return Arc::new(notifier);
            }
            Err(e) => {
                logger::warning(
                    LogTag::Notify,
                    &format!("Telegram disabled, falling back to log output: {}", e),
                );
            }
        }
    }
    let _ = cli;
    Arc::new(LogNotifier)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init();

    logger::info(
        LogTag::System,
        &format!("🚀 marketsweeper v{} starting", env!("CARGO_PKG_VERSION")),
    );

    // Validates (or creates) the settings file before anything connects
    let settings = Settings::load(&cli.config)?;
    logger::info(
        LogTag::System,
        &format!(
            "Settings loaded: preset {}, {} active strategies, {} max trades",
            settings.active_preset_name,
            settings.active_scanners.len(),
            settings.max_concurrent_trades
        ),
    );

    let clients = connect_exchanges();
    if clients.is_empty() {
        anyhow::bail!("no exchange clients could be connected");
    }
    logger::info(
        LogTag::System,
        &format!("Connected {} exchange clients", clients.len()),
    );

    let db = Database::open(&cli.database)?;
    let notifier = build_notifier(&cli);

    let context = Arc::new(EngineContext::new(
        clients,
        db,
        notifier.clone(),
        cli.config.clone(),
    ));

    if cli.scan_once {
        context.perform_scan().await;
        logger::flush();
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    notifier.notify(Notification::EngineStarted).await;

    let scan_context = context.clone();
    let scan_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            scan_context.perform_scan().await;
        }
    });

    let track_context = context.clone();
    let track_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TRACK_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            track_context.perform_track().await;
        }
    });

    // Runs until Ctrl-C
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    logger::info(LogTag::System, "🛑 Shutdown requested, stopping cycles");
    scan_task.abort();
    track_task.abort();
    notifier.notify(Notification::EngineStopped).await;
    logger::flush();
    Ok(())
}
