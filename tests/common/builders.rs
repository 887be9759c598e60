//! Test data builders for creating test objects

use std::path::Path;
use sweepctl::config::{AnalogChannel, ControllerConfig};
use sweepctl::types::{DeviceConfiguration, TriggerSource};

/// Builder for small, fast controller configurations.
///
/// Defaults: two channels at 1 kHz, 0.1 s sweeps, one sweep per run,
/// 200 Hz polling, a device present.
pub struct ConfigBuilder {
    config: ControllerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = ControllerConfig::default();
        config.acquisition.sample_rate = 1_000.0;
        config.acquisition.sweep_duration = 0.1;
        config.acquisition.channels = vec![AnalogChannel::new("AI0"), AnalogChannel::new("AI1")];
        config.display.update_rate_hz = 200.0;
        config.run.sweep_count = 1;
        config.device = Some(DeviceConfiguration::new("SimDev").with_analog_inputs(["AI0", "AI1"]));
        Self { config }
    }

    pub fn sweeps(mut self, count: u32) -> Self {
        self.config.run.sweep_count = count;
        self
    }

    pub fn sweep_duration(mut self, seconds: f64) -> Self {
        self.config.acquisition.sweep_duration = seconds;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.config.acquisition.is_continuous = true;
        self
    }

    pub fn with_stimulation(mut self) -> Self {
        self.config.stimulation.enabled = true;
        self.config.stimulation.sample_rate = 1_000.0;
        self
    }

    pub fn stimulation_trigger(mut self, name: &str) -> Self {
        self.config.stimulation.trigger_source = TriggerSource::new(name);
        self
    }

    pub fn without_device(mut self) -> Self {
        self.config.device = None;
        self
    }

    pub fn logging_to(mut self, dir: &Path) -> Self {
        self.config.logging.enabled = true;
        self.config.logging.directory = dir.to_path_buf();
        self.config.logging.base_name = "cell".to_string();
        self
    }

    pub fn imaging(mut self, command: &Path, response: &Path) -> Self {
        self.config.imaging.enabled = true;
        self.config.imaging.command_path = Some(command.to_path_buf());
        self.config.imaging.response_path = Some(response.to_path_buf());
        self.config.imaging.timeout_ms = 2_000;
        self.config.imaging.poll_interval_ms = 5;
        self
    }

    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
