//! Per-section settings of the controller configuration
//!
//! Each struct maps to one table of the configuration file. Every field has a
//! default so partial files load cleanly.
//!
//! # Main Types
//!
//! - [`AcquisitionSettings`] - Sample rate, sweep duration and analog channels
//! - [`StimulationSettings`] - Whether stimulation runs and how it is triggered
//! - [`DisplaySettings`] - Update rate that paces the polling loop
//! - [`RunSettings`] - Number of sweeps per run
//! - [`ImagingSettings`] - External imaging-controller handshake
//! - [`EndpointSettings`] - Addresses of the remote processes
//! - [`LoggingSettings`] - Data files and diagnostic log output
//!
//! # Sample Rates
//!
//! Device clocks derive their rates from a 100 MHz timebase, so only rates
//! of the form `1e8 / n` are realizable. [`coerce_acquisition_rate`] and
//! [`coerce_stimulation_rate`] snap a requested rate onto that grid.

use crate::types::TriggerSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Timebase of the device sample clock, in Hz
pub const TIMEBASE_HZ: f64 = 100_000_000.0;

/// Counts-to-volts factor of a 16-bit converter spanning +/-10 V
pub const DEFAULT_FULL_SCALE_VOLTS_PER_COUNT: f64 = 10.0 / 32768.0;

/// Realizable acquisition rate at or just above the requested one
pub fn coerce_acquisition_rate(rate: f64) -> f64 {
    if !(rate.is_finite() && rate > 0.0) {
        return rate;
    }
    let divisor = (TIMEBASE_HZ / rate).floor().max(1.0);
    TIMEBASE_HZ / divisor
}

/// Nearest realizable stimulation rate
pub fn coerce_stimulation_rate(rate: f64) -> f64 {
    if !(rate.is_finite() && rate > 0.0) {
        return rate;
    }
    let divisor = (TIMEBASE_HZ / rate).round().max(1.0);
    TIMEBASE_HZ / divisor
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}

fn default_units() -> String {
    "V".to_string()
}

/// One analog input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogChannel {
    /// Channel name (e.g. "AI0")
    pub name: String,

    /// Volts per native unit
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Native unit of the scaled data
    #[serde(default = "default_units")]
    pub units: String,

    /// Whether the channel is delivered to subsystems
    #[serde(default = "default_true")]
    pub active: bool,

    /// Converter polynomial `[c0, c1, ...]` mapping counts to volts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<Vec<f64>>,
}

impl AnalogChannel {
    /// Active channel with unit scale
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scale: 1.0,
            units: default_units(),
            active: true,
            coefficients: None,
        }
    }

    /// Set the channel scale and units
    pub fn with_scale(mut self, scale: f64, units: impl Into<String>) -> Self {
        self.scale = scale;
        self.units = units.into();
        self
    }

    /// Mark the channel inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Use a converter polynomial instead of the linear factor
    pub fn with_coefficients(mut self, coefficients: Vec<f64>) -> Self {
        self.coefficients = Some(coefficients);
        self
    }
}

/// Acquisition section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Scans per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Sweep length in seconds (ignored when continuous)
    #[serde(default = "default_sweep_duration")]
    pub sweep_duration: f64,

    /// Acquire until stopped instead of for a fixed duration
    #[serde(default)]
    pub is_continuous: bool,

    /// Linear counts-to-volts factor
    #[serde(default = "default_fsvpc")]
    pub full_scale_volts_per_count: f64,

    /// Analog channels, in the column order of incoming chunks
    #[serde(default)]
    pub channels: Vec<AnalogChannel>,

    /// Digital input lines packed into each digital word
    #[serde(default)]
    pub digital_line_count: usize,

    /// Trigger that starts acquisition
    #[serde(default)]
    pub trigger_source: TriggerSource,
}

fn default_sample_rate() -> f64 {
    20_000.0
}

fn default_sweep_duration() -> f64 {
    1.0
}

fn default_fsvpc() -> f64 {
    DEFAULT_FULL_SCALE_VOLTS_PER_COUNT
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            sweep_duration: default_sweep_duration(),
            is_continuous: false,
            full_scale_volts_per_count: DEFAULT_FULL_SCALE_VOLTS_PER_COUNT,
            channels: Vec::new(),
            digital_line_count: 0,
            trigger_source: TriggerSource::default(),
        }
    }
}

impl AcquisitionSettings {
    /// Channels delivered to subsystems
    pub fn active_channels(&self) -> impl Iterator<Item = &AnalogChannel> {
        self.channels.iter().filter(|c| c.active)
    }

    /// Scans in one finite sweep
    pub fn scans_per_sweep(&self) -> u64 {
        (self.sample_rate * self.sweep_duration).round().max(0.0) as u64
    }
}

/// Stimulation section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulationSettings {
    /// Whether the stimulus-output process takes part in runs
    #[serde(default)]
    pub enabled: bool,

    /// Output samples per second
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Trigger that starts stimulation
    #[serde(default)]
    pub trigger_source: TriggerSource,
}

impl Default for StimulationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: default_sample_rate(),
            trigger_source: TriggerSource::default(),
        }
    }
}

/// Display section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Display refreshes per second; sets the polling period
    #[serde(default = "default_update_rate")]
    pub update_rate_hz: f64,
}

fn default_update_rate() -> f64 {
    20.0
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            update_rate_hz: default_update_rate(),
        }
    }
}

/// Run section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Sweeps per run (finite acquisition only)
    #[serde(default = "default_sweep_count")]
    pub sweep_count: u32,
}

fn default_sweep_count() -> u32 {
    1
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            sweep_count: default_sweep_count(),
        }
    }
}

/// Imaging-controller handshake section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingSettings {
    /// Whether to arm the imaging controller before each run
    #[serde(default)]
    pub enabled: bool,

    /// Command file path (defaults to the system temp dir)
    #[serde(default)]
    pub command_path: Option<PathBuf>,

    /// Response file path (defaults to the system temp dir)
    #[serde(default)]
    pub response_path: Option<PathBuf>,

    /// How long to wait for the response
    #[serde(default = "default_handshake_timeout")]
    pub timeout_ms: u64,

    /// Response file polling interval
    #[serde(default = "default_handshake_poll")]
    pub poll_interval_ms: u64,
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_handshake_poll() -> u64 {
    100
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command_path: None,
            response_path: None,
            timeout_ms: default_handshake_timeout(),
            poll_interval_ms: default_handshake_poll(),
        }
    }
}

/// User hook script section
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HookSettings {
    /// Rhai script whose hook functions run at lifecycle points
    #[serde(default)]
    pub script: Option<PathBuf>,
}

/// Network endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// RPC address of the acquisition process
    #[serde(default = "default_looper")]
    pub looper: String,

    /// RPC address of the stimulation process
    #[serde(default = "default_refiller")]
    pub refiller: String,

    /// Where the controller serves inbound RPC
    #[serde(default = "default_controller")]
    pub controller_bind: String,

    /// Where the controller receives the data channel
    #[serde(default = "default_data")]
    pub data_bind: String,
}

fn default_looper() -> String {
    "127.0.0.1:8601".to_string()
}

fn default_refiller() -> String {
    "127.0.0.1:8602".to_string()
}

fn default_controller() -> String {
    "127.0.0.1:8600".to_string()
}

fn default_data() -> String {
    "127.0.0.1:8603".to_string()
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            looper: default_looper(),
            refiller: default_refiller(),
            controller_bind: default_controller(),
            data_bind: default_data(),
        }
    }
}

/// Data-file and diagnostic-log section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Whether sweeps are written to data files
    #[serde(default)]
    pub enabled: bool,

    /// Directory for data files
    #[serde(default = "default_data_dir")]
    pub directory: PathBuf,

    /// Data file name stem; files are `<stem>_<NNNN>.csv`
    #[serde(default = "default_base_name")]
    pub base_name: String,

    /// Index of the first sweep written by the next run
    #[serde(default = "default_next_sweep_index")]
    pub next_sweep_index: u32,

    /// Directory for rolling diagnostic logs (none = stderr only)
    #[serde(default)]
    pub log_directory: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("sweepctl")
}

fn default_base_name() -> String {
    "untitled".to_string()
}

fn default_next_sweep_index() -> u32 {
    1
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: default_data_dir(),
            base_name: default_base_name(),
            next_sweep_index: default_next_sweep_index(),
            log_directory: None,
        }
    }
}

impl LoggingSettings {
    /// Name of the data file for the given sweep index
    pub fn file_name_for_sweep(&self, sweep_index: u32) -> String {
        format!("{}_{:04}.csv", self.base_name, sweep_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_rate_uses_floor_divisor() {
        // 1e8 / 30000 = 3333.33 -> divisor 3333
        let coerced = coerce_acquisition_rate(30_000.0);
        assert!((coerced - TIMEBASE_HZ / 3333.0).abs() < 1e-9);
        assert!(coerced >= 30_000.0);
        assert_eq!(coerce_acquisition_rate(20_000.0), 20_000.0);
    }

    #[test]
    fn test_stimulation_rate_rounds_to_nearest() {
        // 1e8 / 30001 = 3333.22 -> divisor 3333
        let coerced = coerce_stimulation_rate(30_001.0);
        assert!((coerced - TIMEBASE_HZ / 3333.0).abs() < 1e-9);
        // 1e8 / 29_996 = 3333.78 -> divisor 3334
        let coerced = coerce_stimulation_rate(29_996.0);
        assert!((coerced - TIMEBASE_HZ / 3334.0).abs() < 1e-9);
    }

    #[test]
    fn test_coercion_leaves_invalid_rates_alone() {
        assert_eq!(coerce_acquisition_rate(0.0), 0.0);
        assert!(coerce_stimulation_rate(f64::NAN).is_nan());
    }

    #[test]
    fn test_scans_per_sweep() {
        let acq = AcquisitionSettings {
            sample_rate: 10_000.0,
            sweep_duration: 0.25,
            ..Default::default()
        };
        assert_eq!(acq.scans_per_sweep(), 2500);
    }

    #[test]
    fn test_channel_defaults_from_partial_toml() {
        let channel: AnalogChannel = toml::from_str(r#"name = "AI0""#).unwrap();
        assert_eq!(channel.scale, 1.0);
        assert!(channel.active);
        assert_eq!(channel.units, "V");
        assert!(channel.coefficients.is_none());
    }

    #[test]
    fn test_data_file_naming() {
        let logging = LoggingSettings {
            base_name: "cell3".into(),
            ..Default::default()
        };
        assert_eq!(logging.file_name_for_sweep(7), "cell3_0007.csv");
    }
}
