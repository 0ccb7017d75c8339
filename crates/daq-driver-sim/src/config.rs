//! Simulated detector configuration.
//!
//! Loaded with figment from, in increasing priority:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `SIM_DAQ_` prefixed environment variables (`SIM_DAQ_MAX_SIZE_X=512`)
//!
//! ```toml
//! port_name = "SIM1"
//! max_size_x = 1024
//! max_size_y = 1024
//! data_type = "UInt16"
//! max_buffers = 50
//! max_memory = 0
//! sleep_quantum_s = 0.001
//! ```

use daq_core::error::DaqError;
use daq_pool::DataType;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SIM_DAQ_";

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong value types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Config validation failed: {0}")]
    ValidationError(#[from] DaqError),
}

/// Construction parameters of a simulated detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimDetectorConfig {
    /// Name the detector reports itself under (default: "SIM1")
    #[serde(default = "default_port_name")]
    pub port_name: String,

    /// Sensor width in pixels (default: 1024)
    #[serde(default = "default_max_size")]
    pub max_size_x: u32,

    /// Sensor height in pixels (default: 1024)
    #[serde(default = "default_max_size")]
    pub max_size_y: u32,

    /// Initial element type (default: UInt8)
    #[serde(default = "default_data_type")]
    pub data_type: DataType,

    /// Maximum output frames alive at once (default: 50)
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,

    /// Maximum bytes held by output frames, 0 = unlimited (default: 0)
    #[serde(default)]
    pub max_memory: usize,

    /// Waits shorter than this are skipped (default: 0.001)
    #[serde(default = "default_sleep_quantum")]
    pub sleep_quantum_s: f64,
}

fn default_port_name() -> String {
    "SIM1".to_string()
}
fn default_max_size() -> u32 {
    1024
}
fn default_data_type() -> DataType {
    DataType::UInt8
}
fn default_max_buffers() -> usize {
    50
}
fn default_sleep_quantum() -> f64 {
    0.001
}

impl Default for SimDetectorConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name(),
            max_size_x: default_max_size(),
            max_size_y: default_max_size(),
            data_type: default_data_type(),
            max_buffers: default_max_buffers(),
            max_memory: 0,
            sleep_quantum_s: default_sleep_quantum(),
        }
    }
}

impl SimDetectorConfig {
    /// Check values that deserialize but cannot drive a detector.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.port_name.is_empty() {
            return Err(DaqError::Configuration("port_name must not be empty".into()));
        }
        if self.max_size_x == 0 || self.max_size_y == 0 {
            return Err(DaqError::Configuration(format!(
                "sensor size must be non-zero, got {}x{}",
                self.max_size_x, self.max_size_y
            )));
        }
        if i32::try_from(self.max_size_x).is_err() || i32::try_from(self.max_size_y).is_err() {
            return Err(DaqError::Configuration(format!(
                "sensor size {}x{} exceeds the parameter range",
                self.max_size_x, self.max_size_y
            )));
        }
        if self.max_buffers == 0 {
            return Err(DaqError::Configuration("max_buffers must be > 0".into()));
        }
        if !self.sleep_quantum_s.is_finite() || self.sleep_quantum_s < 0.0 {
            return Err(DaqError::Configuration(format!(
                "sleep_quantum_s must be a non-negative number, got {}",
                self.sleep_quantum_s
            )));
        }
        if Duration::try_from_secs_f64(self.sleep_quantum_s).is_err() {
            return Err(DaqError::Configuration(format!(
                "sleep_quantum_s {} is too large",
                self.sleep_quantum_s
            )));
        }
        Ok(())
    }

    /// Sleep quantum as a duration. Zero if the value does not pass
    /// [`validate`](Self::validate).
    #[must_use]
    pub fn sleep_quantum(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep_quantum_s).unwrap_or(Duration::ZERO)
    }

    /// Load from defaults, an optional TOML file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigLoadError::NotFound(path.display().to_string()));
            }
            debug!("Loading detector config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Parse a TOML string over the defaults, then validate. Ignores the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigLoadError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigLoadError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        config.validate()?;

        info!(
            port = %config.port_name,
            max_size_x = config.max_size_x,
            max_size_y = config.max_size_y,
            data_type = %config.data_type,
            "Loaded detector config"
        );
        Ok(config)
    }
}
