use crate::error::{BridgeError, Result};
use crate::models::ZoneId;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub staging: StagingConfig,
    pub trigger: TriggerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Zone applied to every timestamp, `Z` or an offset or an IANA name
    pub time_zone: String,
    /// Advisory fetch size; 0 keeps the driver default
    pub fetch_size: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    pub root_dir: PathBuf,
    /// Where STORE results are spooled before staging
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("execution.time_zone", "Z")?
            .set_default("execution.fetch_size", 0)?
            .set_default("execution.batch_size", 1000)?
            .set_default("staging.root_dir", "./staging")?
            .set_default("staging.temp_dir", env::temp_dir().to_string_lossy().to_string())?
            .set_default("trigger.interval_secs", 60)?
            .set_default("logging.level", "info")?;

        if let Ok(time_zone) = env::var("SQLBRIDGE_TIME_ZONE") {
            builder = builder.set_override("execution.time_zone", time_zone)?;
        }

        if let Ok(fetch_size) = env::var("SQLBRIDGE_FETCH_SIZE") {
            builder = builder.set_override("execution.fetch_size", fetch_size.parse::<u64>().unwrap_or(0))?;
        }

        if let Ok(batch_size) = env::var("SQLBRIDGE_BATCH_SIZE") {
            builder = builder.set_override("execution.batch_size", batch_size.parse::<u64>().unwrap_or(1000))?;
        }

        if let Ok(root_dir) = env::var("SQLBRIDGE_STAGING_DIR") {
            builder = builder.set_override("staging.root_dir", root_dir)?;
        }

        if let Ok(temp_dir) = env::var("SQLBRIDGE_TEMP_DIR") {
            builder = builder.set_override("staging.temp_dir", temp_dir)?;
        }

        if let Ok(interval) = env::var("SQLBRIDGE_TRIGGER_INTERVAL_SECS") {
            builder = builder.set_override("trigger.interval_secs", interval.parse::<u64>().unwrap_or(60))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn time_zone(&self) -> Result<ZoneId> {
        self.execution
            .time_zone
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid time zone '{}': {}", self.execution.time_zone, e)))
    }

    /// Requested fetch size, `None` for the driver default
    pub fn fetch_size(&self) -> Option<u32> {
        (self.execution.fetch_size > 0).then_some(self.execution.fetch_size)
    }

    pub fn trigger_interval(&self) -> Duration {
        Duration::from_secs(self.trigger.interval_secs.max(1))
    }
}
