//! PREMIA: premium-target index options selling engine.
//!
//! Service entry point. Loads configuration, initialises structured
//! logging, opens the store, builds the broker client and notifier, and
//! runs the background tasks (quote refresh, stop-loss supervisor, health
//! endpoint) with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use premia::broker::neo::NeoClient;
use premia::config::AppConfig;
use premia::engine::{quotes, supervisor};
use premia::http::run_health_server;
use premia::notify::{Notifier, NullNotifier, TelegramNotifier};
use premia::store::sqlite::SqliteStore;
use premia::Engine;

const BANNER: &str = r#"
  ____  ____  _____ __  __ ___    _
 |  _ \|  _ \| ____|  \/  |_ _|  / \
 | |_) | |_) |  _| | |\/| || |  / _ \
 |  __/|  _ <| |___| |  | || | / ___ \
 |_|   |_| \_\_____|_|  |_|___/_/   \_\

  Premium-target options engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        default_index = %cfg.service.default_index,
        quote_refresh_secs = cfg.service.quote_refresh_secs,
        supervisor_poll_secs = cfg.service.supervisor_poll_secs,
        "PREMIA starting up"
    );

    // -- Collaborators ----------------------------------------------------

    let store = Arc::new(SqliteStore::connect(&cfg.store.database_url).await?);
    let broker = Arc::new(NeoClient::new(&cfg.broker)?);

    let notifier: Arc<dyn Notifier> = match cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok())
    {
        Some(token) => Arc::new(TelegramNotifier::new(token)?),
        None => {
            warn!("No Telegram bot token configured; notifications go to the log only");
            Arc::new(NullNotifier)
        }
    };

    let engine = Arc::new(Engine::new(cfg.clone(), broker, store, notifier)?);

    // -- Background tasks -------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh = tokio::spawn(quotes::run_refresh_task(
        engine.clone(),
        Duration::from_secs(cfg.service.quote_refresh_secs),
        shutdown_rx.clone(),
    ));

    let supervise = tokio::spawn(supervisor::run_supervisor_task(
        engine.clone(),
        Duration::from_secs(cfg.service.supervisor_poll_secs),
        shutdown_rx.clone(),
    ));

    let health = tokio::spawn(run_health_server(cfg.service.health_port, shutdown_rx));

    info!("Engine running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    let _ = refresh.await;
    let _ = supervise.await;
    if let Ok(Err(e)) = health.await {
        error!(error = %e, "Health server exited with error");
    }

    info!("PREMIA shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("premia=info"));

    let json_logging = std::env::var("PREMIA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
