use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::file::FileAccessMode;

/// File-backed streaming configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VodConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub feeding: FeedingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory media file names are resolved against.
    pub media_root: PathBuf,
    pub access_mode: FileAccessMode,
    /// Read-ahead window hint in bytes.
    pub window_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./media"),
            access_mode: FileAccessMode::Cached,
            window_size: 128 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedingConfig {
    /// Look-ahead used when the client does not announce a buffer length.
    pub client_buffer_seconds: i32,
    pub timer_interval_ms: u64,
    /// Consecutive idle timer ticks before the pacing clock is rebased.
    pub stall_threshold_ticks: u32,
    /// Upper bound of feed steps run for one readiness signal.
    pub max_steps_per_ready: u32,
}

impl Default for FeedingConfig {
    fn default() -> Self {
        Self {
            client_buffer_seconds: 5,
            timer_interval_ms: 1000,
            stall_threshold_ticks: 1,
            max_steps_per_ready: 256,
        }
    }
}

impl FeedingConfig {
    #[must_use]
    pub const fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_interval_ms)
    }
}

impl VodConfig {
    /// Load configuration from an optional file, then environment variables
    /// (`SYNCTV_VOD_FEEDING__CLIENT_BUFFER_SECONDS=3`, ...).
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SYNCTV_VOD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::Message(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            )));
        }
        if self.feeding.timer_interval_ms == 0 {
            return Err(ConfigError::Message(
                "feeding.timer_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.feeding.stall_threshold_ticks == 0 {
            return Err(ConfigError::Message(
                "feeding.stall_threshold_ticks must be greater than 0".to_string(),
            ));
        }
        if self.feeding.max_steps_per_ready == 0 {
            return Err(ConfigError::Message(
                "feeding.max_steps_per_ready must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
