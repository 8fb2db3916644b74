//! Application entry point for the `subsecure-ingest` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the store (PostgreSQL pool, or in-memory for `DATABASE_URL=memory:`)
//! - Creating the database schema if it does not exist
//! - Serving the query/update API (unless `HTTP_ENABLED=false`)
//! - Running the MQTT subscription loop until an interrupt arrives
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string or `memory:`
//! - `MQTT_BROKER`, `MQTT_PORT`, `MQTT_TOPIC` – broker session (see `config`)
//! - `INGEST_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `INGEST_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use subsecure_ingest::{
    config, routes, schema, Applier, MemoryStore, NodeStore, PgStore, SubscriptionManager,
};

/// How long the query API gets to finish in-flight requests after shutdown.
const API_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(forward_signals(stop_tx));

    let server = if cfg.http_enabled {
        let app = routes::router(store.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind query API on {addr}"))?;
        tracing::info!("Listening on {}", addr);

        let stop = stopped(stop_rx.clone());
        Some(tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(stop).await
        }))
    } else {
        None
    };

    let manager = SubscriptionManager::new(cfg.mqtt.clone(), Applier::new(store));
    let outcome = manager.run(stopped(stop_rx)).await;

    if let Some(server) = server {
        if outcome.is_err() {
            server.abort();
        } else {
            match tokio::time::timeout(API_SHUTDOWN_GRACE, server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!("Query API stopped with error: {}", e),
                Ok(Err(e)) => tracing::warn!("Query API task failed: {}", e),
                Err(_) => tracing::warn!("Timed out waiting for query API to stop"),
            }
        }
    }

    outcome.context("MQTT subscription ended with an error")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Open the configured store and make sure its schema exists.
async fn open_store(cfg: &config::Config) -> Result<Arc<dyn NodeStore>> {
    // ---
    if cfg.uses_memory_store() {
        tracing::warn!("Using in-memory store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Flip the shutdown flag on the first interrupt (or SIGTERM on unix).
async fn forward_signals(stop_tx: watch::Sender<bool>) {
    // ---
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for interrupt: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = terminate => {}
    }

    tracing::info!("Termination signal received");
    let _ = stop_tx.send(true);
}

/// Resolves once the shutdown flag is set or the sender is gone.
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `INGEST_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, falling back to `INGEST_LOG_LEVEL`
///
/// Called once at startup, before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("INGEST_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("INGEST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
