use crate::algorithms::tdoa_engine::MatchingAlgorithm;
use crate::core::constants::{LOCODECK_TS_FREQ, TDOA3_RECEIVE_TIMEOUT};
use crate::core::types::AnchorId;
use crate::hardware::simulator::SimulatorConfig;
use crate::processing::registry::DEFAULT_INACTIVITY_WINDOW_MS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Remote timestamps older than this are not used for matching (ms)
pub const DEFAULT_REMOTE_DATA_VALIDITY_MS: u64 = 30;

/// Anchor-to-anchor time of flight older than this is not used (ms)
pub const DEFAULT_TOF_VALIDITY_MS: u64 = 2_000;

pub const DEFAULT_ESTIMATOR_QUEUE_CAPACITY: usize = 20;

/// Tag-side ranging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Receive timeout handed to the radio (radio units)
    pub receive_timeout: u16,
    /// Contexts not heard from within this window are expired (ms)
    pub inactivity_window_ms: u64,
    pub remote_data_validity_ms: u64,
    pub tof_validity_ms: u64,
    /// How the engine picks the second anchor of a pair
    pub matching_algorithm: MatchingAlgorithm,
    /// Tick rate of the radio timestamps (Hz)
    pub timestamp_frequency_hz: f64,
    /// Bounded estimator queue length
    pub estimator_queue_capacity: usize,
    /// Fixed height fed to the estimator when positioning in 2D (m)
    pub two_d_height: Option<f32>,
    /// Anchor pair that gets detailed telemetry
    pub tracked_pair: [AnchorId; 2],
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            receive_timeout: TDOA3_RECEIVE_TIMEOUT,
            inactivity_window_ms: DEFAULT_INACTIVITY_WINDOW_MS,
            remote_data_validity_ms: DEFAULT_REMOTE_DATA_VALIDITY_MS,
            tof_validity_ms: DEFAULT_TOF_VALIDITY_MS,
            matching_algorithm: MatchingAlgorithm::Random,
            timestamp_frequency_hz: LOCODECK_TS_FREQ,
            estimator_queue_capacity: DEFAULT_ESTIMATOR_QUEUE_CAPACITY,
            two_d_height: None,
            tracked_pair: [1, 2],
        }
    }
}

impl TagConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.receive_timeout == 0 {
            return Err(invalid("receive_timeout", self.receive_timeout, "Receive timeout must be non-zero"));
        }
        if self.inactivity_window_ms == 0 {
            return Err(invalid(
                "inactivity_window_ms",
                self.inactivity_window_ms,
                "Inactivity window must be non-zero",
            ));
        }
        if self.remote_data_validity_ms == 0 || self.remote_data_validity_ms > self.inactivity_window_ms {
            return Err(invalid(
                "remote_data_validity_ms",
                self.remote_data_validity_ms,
                "Remote data validity must be non-zero and within the inactivity window",
            ));
        }
        if self.tof_validity_ms == 0 {
            return Err(invalid("tof_validity_ms", self.tof_validity_ms, "Time of flight validity must be non-zero"));
        }
        if !(self.timestamp_frequency_hz.is_finite() && self.timestamp_frequency_hz > 0.0) {
            return Err(invalid(
                "timestamp_frequency_hz",
                self.timestamp_frequency_hz,
                "Timestamp frequency must be positive",
            ));
        }
        if self.estimator_queue_capacity == 0 {
            return Err(invalid(
                "estimator_queue_capacity",
                self.estimator_queue_capacity,
                "Estimator queue needs room for at least one item",
            ));
        }
        if let Some(height) = self.two_d_height {
            if !height.is_finite() {
                return Err(invalid("two_d_height", height, "Height must be finite"));
            }
        }
        if self.tracked_pair[0] == self.tracked_pair[1] {
            return Err(invalid(
                "tracked_pair",
                format!("{:?}", self.tracked_pair),
                "Tracked anchors must differ",
            ));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    #[error("I/O error: {message}")]
    IoError { message: String },
    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// On-disk layout of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFileData {
    pub tag: TagConfig,
    pub simulator: SimulatorConfig,
}

/// Holds the active configuration and its backing file
#[derive(Debug, Default)]
pub struct ConfigurationManager {
    data: ConfigFileData,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn tag_config(&self) -> &TagConfig {
        &self.data.tag
    }

    pub fn simulator_config(&self) -> &SimulatorConfig {
        &self.data.simulator
    }

    /// Replace the tag configuration after validating it
    pub fn update_tag_config(&mut self, config: TagConfig) -> ConfigResult<()> {
        config.validate()?;
        self.data.tag = config;
        self.is_modified = true;
        Ok(())
    }

    pub fn update_simulator_config(&mut self, config: SimulatorConfig) -> ConfigResult<()> {
        config.validate()?;
        self.data.simulator = config;
        self.is_modified = true;
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn load_from_str(&mut self, content: &str) -> ConfigResult<()> {
        let data: ConfigFileData = serde_json::from_str(content).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to parse config: {}", e),
        })?;

        data.tag.validate()?;
        data.simulator.validate()?;

        self.data = data;
        self.is_modified = false;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        self.load_from_str(&content)?;
        self.config_file_path = Some(path_str);
        Ok(())
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(&self.data).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let content = self.to_json()?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> ConfigResult<()> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            }),
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }
}
