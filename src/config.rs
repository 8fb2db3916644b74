//! Configuration loader for the `subsecure-ingest` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Values are read once at startup into [`Config`],
//! which is then passed explicitly to the components that need it.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name).ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_TOPIC: &str = "subsecure/data";
pub const DEFAULT_BROKER: &str = "broker.hivemq.com";
pub const DEFAULT_PORT: u16 = 1883;

/// `DATABASE_URL` value selecting the in-process store.
pub const MEMORY_DATABASE_URL: &str = "memory:";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string, or `memory:`.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub mqtt: MqttConfig,

    /// Query/update API port.
    pub http_port: u16,

    /// Whether the query/update API is served alongside ingestion.
    pub http_enabled: bool,
}

/// Broker session settings for the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    // ---
    pub topic: String,
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,

    /// Extra attempts for the first connect. Zero means a failed first
    /// connect ends the run.
    pub connect_retries: u32,

    /// First backoff delay; doubled per attempt up to [`MAX_RETRY_DELAY`].
    pub retry_base: Duration,
}

/// Upper bound on the connect backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

impl MqttConfig {
    /// Backoff before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        // ---
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

/// Load configuration from the process environment.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string, or `memory:`
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `MQTT_TOPIC` – topic to subscribe (default: `subsecure/data`)
/// - `MQTT_BROKER` – broker host (default: `broker.hivemq.com`)
/// - `MQTT_PORT` – broker port (default: 1883)
/// - `MQTT_CLIENT_ID` – client identifier (default: random per run)
/// - `MQTT_KEEP_ALIVE_SECS` – keep-alive interval (default: 60)
/// - `MQTT_CONNECT_RETRIES` – retries for the first connect (default: 0)
/// - `MQTT_RETRY_BASE_MS` – first backoff delay (default: 500)
/// - `HTTP_PORT` – query API port (default: 8080)
/// - `HTTP_ENABLED` – serve the query API (default: true)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let db_url = require_env!(lookup, "DATABASE_URL");
    let db_pool_max = parse_env!(lookup, "DB_POOL_MAX", u32, 5);

    let topic = lookup("MQTT_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    let broker = lookup("MQTT_BROKER").unwrap_or_else(|| DEFAULT_BROKER.to_string());
    let port = parse_env!(lookup, "MQTT_PORT", u16, DEFAULT_PORT);
    let client_id = lookup("MQTT_CLIENT_ID")
        .unwrap_or_else(|| format!("subsecure-ingest-{}", uuid::Uuid::new_v4().simple()));
    let keep_alive = Duration::from_secs(parse_env!(lookup, "MQTT_KEEP_ALIVE_SECS", u64, 60));
    let connect_retries = parse_env!(lookup, "MQTT_CONNECT_RETRIES", u32, 0);
    let retry_base = Duration::from_millis(parse_env!(lookup, "MQTT_RETRY_BASE_MS", u64, 500));

    let http_port = parse_env!(lookup, "HTTP_PORT", u16, 8080);
    let http_enabled = match lookup("HTTP_ENABLED").as_deref().map(str::trim) {
        None => true,
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        Some(other) => return Err(anyhow!("Invalid HTTP_ENABLED: {}", other)),
    };

    if keep_alive < Duration::from_secs(5) {
        return Err(anyhow!(
            "Invalid MQTT_KEEP_ALIVE_SECS: must be at least 5, got {}",
            keep_alive.as_secs()
        ));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        mqtt: MqttConfig {
            topic,
            broker,
            port,
            client_id,
            keep_alive,
            connect_retries,
            retry_base,
        },
        http_port,
        http_enabled,
    })
}

impl Config {
    /// True when `DATABASE_URL` selects the in-process store.
    pub fn uses_memory_store(&self) -> bool {
        self.db_url == MEMORY_DATABASE_URL
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing all other values.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  MQTT_BROKER           : {}", self.mqtt.broker_addr());
        tracing::info!("  MQTT_TOPIC            : {}", self.mqtt.topic);
        tracing::info!("  MQTT_CLIENT_ID        : {}", self.mqtt.client_id);
        tracing::info!("  MQTT_KEEP_ALIVE_SECS  : {}", self.mqtt.keep_alive.as_secs());
        tracing::info!("  MQTT_CONNECT_RETRIES  : {}", self.mqtt.connect_retries);
        tracing::info!("  HTTP_PORT             : {}", self.http_port);
        tracing::info!("  HTTP_ENABLED          : {}", self.http_enabled);
    }
}

fn mask_db_url(url: &str) -> String {
    // ---
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    match url[..at_pos].rfind(':') {
        // "postgres://host@..." has its only colon in the scheme
        Some(colon_pos) if !url[colon_pos..].starts_with("://") => {
            format!("{}:****{}", &url[..colon_pos], &url[at_pos..])
        }
        _ => url.to_string(),
    }
}
