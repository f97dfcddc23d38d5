use std::fs;
use std::path::PathBuf;

use chrono_tz::Tz;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("api.api_key must not be empty")]
    MissingApiKey,
    #[error("api.site must not be empty")]
    MissingSite,
    #[error("api.daily_limit must be positive")]
    ZeroDailyLimit,
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

fn default_base_url() -> String {
    "https://monitoringapi.solaredge.com/site/".to_string()
}

fn default_mode() -> String {
    "energy".to_string()
}

fn default_daily_limit() -> u32 {
    300
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub api_key: String,
    pub site: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Endpoint variant selector, substituted into the request path as
    /// `<mode>Details.json`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Vendor request quota per day; the poll delay is derived from it.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// IANA zone name the site reports its local timestamps in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl ApiConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub ilp_tcp_addr: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoint.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("SOLAREDGE_CONFIG").unwrap_or_else(|_| "solaredge-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let mut cfg: AppConfig = toml::from_str(&contents)?;
        cfg.api.mode.make_ascii_lowercase();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup validation; failures here abort the process, nothing is
    /// retried.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.api.site.trim().is_empty() {
            return Err(ConfigError::MissingSite);
        }
        if self.api.daily_limit == 0 {
            return Err(ConfigError::ZeroDailyLimit);
        }
        self.api.timezone()?;
        Ok(())
    }
}
