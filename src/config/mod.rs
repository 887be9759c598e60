//! Configuration module for sweepctl
//!
//! This module handles the controller configuration:
//! - Loading and saving [`ControllerConfig`] as TOML or JSON
//! - Validation and sample-rate coercion
//! - The run-settings payload sent to the remote processes
//!
//! # Config Location
//!
//! Without an explicit path the configuration is read from the platform
//! config directory:
//! - **Linux**: `~/.config/sweepctl/sweepctl.toml`
//! - **macOS**: `~/Library/Application Support/sweepctl/sweepctl.toml`
//! - **Windows**: `%APPDATA%\sweepctl\sweepctl.toml`
//!
//! # Example
//!
//! ```ignore
//! use sweepctl::config::ControllerConfig;
//!
//! let config = ControllerConfig::load("rig.toml")?;
//! println!("{} sweeps per run", config.sweeps_per_run());
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, SweepCtlError};
use crate::types::DeviceConfiguration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "sweepctl";

/// Default config filename
pub const CONFIG_FILE: &str = "sweepctl.toml";

// ==================== Config Location ====================

/// Directory holding the default configuration
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Path of the default configuration file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

// ==================== Controller Config ====================

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Device description; `None` leaves the controller waiting for one
    #[serde(default)]
    pub device: Option<DeviceConfiguration>,

    /// Acquisition settings
    #[serde(default)]
    pub acquisition: AcquisitionSettings,

    /// Stimulation settings
    #[serde(default)]
    pub stimulation: StimulationSettings,

    /// Display settings
    #[serde(default)]
    pub display: DisplaySettings,

    /// Run settings
    #[serde(default)]
    pub run: RunSettings,

    /// Imaging handshake settings
    #[serde(default)]
    pub imaging: ImagingSettings,

    /// Remote process addresses
    #[serde(default)]
    pub endpoints: EndpointSettings,

    /// Data file and diagnostic log settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// User hook script
    #[serde(default)]
    pub hooks: HookSettings,
}

impl ControllerConfig {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load, coerce and validate a configuration file.
    ///
    /// `.json` files are parsed as JSON, everything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SweepCtlError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let mut config: Self = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                SweepCtlError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?,
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                SweepCtlError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?,
        };

        config.coerce_sample_rates();
        config.validate()?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the configuration from the default location, or defaults when
    /// no file exists there
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save the configuration, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SweepCtlError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                SweepCtlError::Config(format!("Failed to serialize config: {}", e))
            })?,
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| {
                SweepCtlError::Config(format!("Failed to serialize config: {}", e))
            })?,
        };

        std::fs::write(path, content).map_err(|e| {
            SweepCtlError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    /// Snap sample rates onto the device timebase
    pub fn coerce_sample_rates(&mut self) {
        let requested = self.acquisition.sample_rate;
        self.acquisition.sample_rate = coerce_acquisition_rate(requested);
        if self.acquisition.sample_rate != requested {
            tracing::info!(
                "Acquisition sample rate coerced from {} Hz to {} Hz",
                requested,
                self.acquisition.sample_rate
            );
        }

        let requested = self.stimulation.sample_rate;
        self.stimulation.sample_rate = coerce_stimulation_rate(requested);
        if self.stimulation.sample_rate != requested {
            tracing::info!(
                "Stimulation sample rate coerced from {} Hz to {} Hz",
                requested,
                self.stimulation.sample_rate
            );
        }
    }

    /// Check the configuration for values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        let acq = &self.acquisition;
        if !(acq.sample_rate.is_finite() && acq.sample_rate > 0.0) {
            return Err(SweepCtlError::Config(format!(
                "acquisition sample rate must be positive, got {}",
                acq.sample_rate
            )));
        }
        if !acq.is_continuous && !(acq.sweep_duration.is_finite() && acq.sweep_duration > 0.0) {
            return Err(SweepCtlError::Config(format!(
                "sweep duration must be positive, got {}",
                acq.sweep_duration
            )));
        }
        if !(self.display.update_rate_hz.is_finite() && self.display.update_rate_hz > 0.0) {
            return Err(SweepCtlError::Config(format!(
                "display update rate must be positive, got {}",
                self.display.update_rate_hz
            )));
        }
        if self.run.sweep_count == 0 && !acq.is_continuous {
            return Err(SweepCtlError::Config(
                "sweep count must be at least 1".to_string(),
            ));
        }
        if self.stimulation.enabled
            && !(self.stimulation.sample_rate.is_finite() && self.stimulation.sample_rate > 0.0)
        {
            return Err(SweepCtlError::Config(format!(
                "stimulation sample rate must be positive, got {}",
                self.stimulation.sample_rate
            )));
        }
        if let Some(device) = &self.device {
            let declared = device.analog_input_channels.len();
            if declared > 0 && declared != acq.channels.len() {
                return Err(SweepCtlError::Config(format!(
                    "device declares {} analog inputs but {} channels are configured",
                    declared,
                    acq.channels.len()
                )));
            }
        }
        Ok(())
    }

    /// Sweeps a run performs: exactly one when acquisition is continuous
    pub fn sweeps_per_run(&self) -> u32 {
        if self.acquisition.is_continuous {
            1
        } else {
            self.run.sweep_count
        }
    }

    /// Minimum polling period of a run: `min(1/update_rate, sweep_duration)`
    pub fn min_polling_period(&self) -> f64 {
        let display_period = 1.0 / self.display.update_rate_hz;
        if self.acquisition.is_continuous {
            display_period
        } else {
            display_period.min(self.acquisition.sweep_duration)
        }
    }

    /// Polling period within a sweep: `1/update_rate`
    pub fn polling_period(&self) -> f64 {
        1.0 / self.display.update_rate_hz
    }

    /// Build the payload sent with `willPerformRun`
    pub fn run_settings_payload(&self) -> RunSettingsPayload {
        RunSettingsPayload {
            acquisition: self.acquisition.clone(),
            stimulation: self.stimulation.clone(),
            sweep_count: self.sweeps_per_run(),
            created_at: Utc::now(),
        }
    }
}

/// Settings handed to the remote processes when a run is armed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettingsPayload {
    /// Acquisition settings in effect for the run
    pub acquisition: AcquisitionSettings,
    /// Stimulation settings in effect for the run
    pub stimulation: StimulationSettings,
    /// Sweeps the run will perform
    pub sweep_count: u32,
    /// When the run was armed
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.acquisition.channels = vec![
            AnalogChannel::new("AI0").with_scale(0.1, "mV"),
            AnalogChannel::new("AI1").inactive(),
        ];
        config.run.sweep_count = 3;
        config
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rig.toml");
        let config = sample_config();
        config.save(&path).unwrap();

        let loaded = ControllerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_selected_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rig.json");
        sample_config().save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.trim_start().starts_with('{'));
        assert_eq!(ControllerConfig::load(&path).unwrap().run.sweep_count, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[run]\nsweep_count = 5\n\n[display]\nupdate_rate_hz = 10.0\n",
        )
        .unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.run.sweep_count, 5);
        assert_eq!(config.display.update_rate_hz, 10.0);
        assert_eq!(config.acquisition.sample_rate, 20_000.0);
        assert_eq!(config.imaging.timeout_ms, 10_000);
        assert_eq!(config.endpoints.looper, "127.0.0.1:8601");
    }

    #[test]
    fn test_load_coerces_rates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rates.toml");
        std::fs::write(&path, "[acquisition]\nsample_rate = 30000.0\n").unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert!((config.acquisition.sample_rate - 1e8 / 3333.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_zero_sweeps() {
        let mut config = ControllerConfig::default();
        config.run.sweep_count = 0;
        assert!(matches!(config.validate(), Err(SweepCtlError::Config(_))));

        config.acquisition.is_continuous = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_device_channel_count() {
        let mut config = sample_config();
        config.device = Some(DeviceConfiguration::new("Dev1").with_analog_inputs(["AI0"]));
        assert!(config.validate().is_err());

        config.device = Some(DeviceConfiguration::new("Dev1").with_analog_inputs(["AI0", "AI1"]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_continuous_run_has_one_sweep() {
        let mut config = sample_config();
        assert_eq!(config.sweeps_per_run(), 3);
        config.acquisition.is_continuous = true;
        assert_eq!(config.sweeps_per_run(), 1);
    }

    #[test]
    fn test_min_polling_period() {
        let mut config = ControllerConfig::default();
        config.display.update_rate_hz = 20.0;
        config.acquisition.sweep_duration = 0.01;
        assert_eq!(config.min_polling_period(), 0.01);
        config.acquisition.sweep_duration = 2.0;
        assert_eq!(config.min_polling_period(), 0.05);
    }

    #[test]
    fn test_run_settings_payload_serializes() {
        let payload = sample_config().run_settings_payload();
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["sweep_count"], 3);
        assert_eq!(value["acquisition"]["channels"][0]["name"], "AI0");
        assert!(value["created_at"].is_string());
    }
}
