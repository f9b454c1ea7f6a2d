//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call nexus_core_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
pub fn init() -> Result<&'static AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 5)?
        .set_default("auth.jwt_secret", "dev-secret-change-me")?
        .set_default("hub.max_sessions_per_user", 10)?
        .set_default("hub.connect_rate_limit_per_minute", 10)?
        .set_default("hub.session_outbound_queue_depth", 256)?
        .set_default("hub.control_channel_depth", 256)?
        .set_default("hub.membership_snapshot_page_cap", 1000)?
        .set_default("hub.write_deadline_secs", 10)?
        .set_default("hub.ping_interval_secs", 30)?
        .set_default("hub.shutdown_grace_secs", 5)?
        .set_default("outbox.drain_interval_ms", 500)?
        .set_default("outbox.drain_batch_size", 100)?
        .set_default("outbox.retention_hours", 72)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (NEXUS__SERVER__HOST, NEXUS__DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("NEXUS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub hub: HubConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL or SQLite connection URL — selects the backend.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL for the event bus — optional; in-process
    /// broadcast only when unset.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared secret used to verify bearer tokens minted by the external
    /// auth service (HS256).
    pub jwt_secret: String,
}

/// DeliveryHub tuning knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    /// Per-user live session cap (K). Connection K+1 evicts the oldest.
    pub max_sessions_per_user: u32,
    /// Per-user connection accept rate limit, sliding one-minute window.
    pub connect_rate_limit_per_minute: u32,
    /// Bounded depth of each session's outbound queue.
    pub session_outbound_queue_depth: usize,
    /// Bounded depth of the control actor's register/unregister/broadcast channels.
    pub control_channel_depth: usize,
    /// Page cap when snapshotting a user's conversation membership at connect time.
    pub membership_snapshot_page_cap: i64,
    /// Write-pump deadline — a stalled socket write past this is treated as dead.
    pub write_deadline_secs: u64,
    /// Interval between keepalive pings from the write pump.
    pub ping_interval_secs: u64,
    /// Grace period shutdown allows subscriber workers to drain before forcing closed.
    pub shutdown_grace_secs: u64,
}

/// Outbox drainer tuning knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct OutboxConfig {
    pub drain_interval_ms: u64,
    pub drain_batch_size: i64,
    /// How long consumed one-time prekeys and processed outbox rows are
    /// retained before garbage collection.
    pub retention_hours: i64,
}
