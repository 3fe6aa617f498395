//! kuil-voice - Voice calibration service
//!
//! Serves tone calibration, hook-score calibration and voice-signature
//! evolution over HTTP, and runs the periodic evolution scheduler.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kuil_common::config::{self, TomlConfig};
use kuil_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kuil_voice::config::RuntimeSettings;
use kuil_voice::services::{AnthropicGateway, EvolutionScheduler, LlmGateway, UnconfiguredGateway};
use kuil_voice::AppState;

const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for kuil-voice
#[derive(Parser, Debug)]
#[command(name = "kuil-voice")]
#[command(about = "Tone calibration, hook-score calibration and voice evolution service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides TOML)
    #[arg(short, long, env = "KUIL_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "KUIL_BIND")]
    bind: std::net::IpAddr,

    /// Bootstrap TOML file
    #[arg(short, long, env = "KUIL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides TOML)
    #[arg(short, long, env = "KUIL_DATABASE")]
    database: Option<PathBuf>,
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let default_filter = format!(
        "kuil_voice={level},kuil_common={level},tower_http=info",
        level = config.logging.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

fn build_gateway(config: &TomlConfig) -> Result<Arc<dyn LlmGateway>> {
    match config::resolve_llm_api_key(config) {
        Some(api_key) => {
            let gateway = AnthropicGateway::new(
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                api_key,
                Duration::from_secs(config.llm.timeout_secs.max(1)),
            )
            .context("Failed to build LLM gateway client")?;
            info!(base_url = %config.llm.base_url, model = %config.llm.model, "LLM gateway configured");
            Ok(Arc::new(gateway))
        }
        None => Ok(Arc::new(UnconfiguredGateway)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path("kuil-voice"));
    let toml_config = config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_tracing(&toml_config)?;

    info!("Starting kuil-voice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| toml_config.resolved_database_path());
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    info!("Database: {}", db_path.display());

    let db_pool = kuil_voice::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let settings = RuntimeSettings::load(&db_pool)
        .await
        .context("Failed to load runtime settings")?;
    let check_interval = settings.evolution_check_interval;

    let gateway = build_gateway(&toml_config)?;
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let state = AppState::new(db_pool.clone(), event_bus, settings, gateway);

    let cancel_token = CancellationToken::new();
    let scheduler = EvolutionScheduler::new(db_pool, Arc::clone(&state.evolution), check_interval);
    let scheduler_handle = tokio::spawn(scheduler.run(cancel_token.clone()));

    let app = kuil_voice::build_router(state);

    let port = args.port.unwrap_or(toml_config.port);
    let addr = SocketAddr::new(args.bind, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel_token.cancel();
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Evolution scheduler task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
