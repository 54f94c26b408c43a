use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub auth: AuthSettings,
    pub aggregator: AggregatorSettings,
    pub channel: ChannelSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

/// Camera tokens are minted by the participation service; we only verify them.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub issuer: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorSettings {
    /// How often stale cameras are swept and live events recomputed.
    pub sweep_interval_secs: u64,
    /// A camera that has not reported for this long is considered gone.
    pub stale_after_secs: u64,
    /// Minimum time between automatic switches. 0 disables the dwell.
    pub min_switch_dwell_ms: u64,
    pub switch_history_len: usize,
    pub max_conflict_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelSettings {
    pub heartbeat_secs: u64,
    pub max_subscribers_per_event: usize,
    pub backlog_len: usize,
    pub buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub json: bool,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("LIVECAST"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "livecast")?
            .set_default("storage.backend", "mongo")?
            .set_default("auth.jwt_secret", "change-me-in-production")?
            .set_default("auth.issuer", "livecast")?
            .set_default("aggregator.sweep_interval_secs", 10)?
            .set_default("aggregator.stale_after_secs", 30)?
            .set_default("aggregator.min_switch_dwell_ms", 0)?
            .set_default("aggregator.switch_history_len", 10)?
            .set_default("aggregator.max_conflict_retries", 3)?
            .set_default("channel.heartbeat_secs", 15)?
            .set_default("channel.max_subscribers_per_event", 256)?
            .set_default("channel.backlog_len", 64)?
            .set_default("channel.buffer", 128)?
            .set_default("log.json", false)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
