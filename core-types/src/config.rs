use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Engine configuration; every section falls back to its defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub multi_key: MultiKeySettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Single-key rolling window knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default = "default_ring_len")]
    pub ring_len: usize,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: i64, // rolling max validity
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64, // point staleness
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            ring_len: default_ring_len(),
            duration_secs: default_duration_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiKeySettings {
    #[serde(default = "default_ring_len")]
    pub seg_len: usize,
    #[serde(default)]
    pub series_len: Option<usize>, // None disables history
    #[serde(default = "default_duration_secs")]
    pub duration_secs: i64,
}

impl Default for MultiKeySettings {
    fn default() -> Self {
        Self {
            seg_len: default_ring_len(),
            series_len: None,
            duration_secs: default_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_registry_ring_len")]
    pub ring_len: usize,
    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: i64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ring_len: default_registry_ring_len(),
            timeout_secs: default_registry_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_interval_secs: default_max_interval_secs(),
        }
    }
}

fn default_ring_len() -> usize {
    3
}

fn default_duration_secs() -> i64 {
    300
}

fn default_timeout_secs() -> i64 {
    3
}

fn default_registry_ring_len() -> usize {
    300
}

fn default_registry_timeout_secs() -> i64 {
    5
}

fn default_max_interval_secs() -> u64 {
    24 * 60 * 60
}

impl EngineConfig {
    /// Loads `config.toml` (optional) overlaid with `TIMECTL_`-prefixed environment variables,
    /// e.g. `TIMECTL_WINDOW__RING_LEN=60`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TIMECTL").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.ring_len == 0 {
            return Err(ConfigError::Message("window.ring_len must be non-zero".to_string()));
        }
        if self.multi_key.seg_len == 0 {
            return Err(ConfigError::Message("multi_key.seg_len must be non-zero".to_string()));
        }
        if self.multi_key.series_len == Some(0) {
            return Err(ConfigError::Message(
                "multi_key.series_len must be non-zero when set".to_string(),
            ));
        }
        if self.registry.ring_len == 0 {
            return Err(ConfigError::Message("registry.ring_len must be non-zero".to_string()));
        }
        Ok(())
    }
}
