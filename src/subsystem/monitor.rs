//! Running per-channel statistics for the current sweep.

use super::{RunContext, Subsystem, SweepContext, SweepData};
use crate::error::Result;
use crate::types::{AbortReason, IncrementalStats};

/// Tracks min/max/mean of each active channel over a sweep
pub struct MonitorSubsystem {
    enabled: bool,
    channel_names: Vec<String>,
    stats: Vec<IncrementalStats>,
    sweep_ordinal: u32,
    scans_seen: u64,
    last_summary: Vec<(String, IncrementalStats)>,
}

impl Default for MonitorSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSubsystem {
    pub fn new() -> Self {
        Self {
            enabled: true,
            channel_names: Vec::new(),
            stats: Vec::new(),
            sweep_ordinal: 0,
            scans_seen: 0,
            last_summary: Vec::new(),
        }
    }

    /// Statistics of the current sweep, per active channel
    pub fn current(&self) -> &[IncrementalStats] {
        &self.stats
    }

    /// Statistics of the last completed sweep
    pub fn last_summary(&self) -> &[(String, IncrementalStats)] {
        &self.last_summary
    }

    /// Scans seen in the current sweep
    pub fn scans_seen(&self) -> u64 {
        self.scans_seen
    }
}

impl Subsystem for MonitorSubsystem {
    fn name(&self) -> &str {
        "Monitor"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn will_perform_run(&mut self, ctx: &RunContext) -> Result<()> {
        self.channel_names = ctx
            .config
            .acquisition
            .active_channels()
            .map(|c| c.name.clone())
            .collect();
        self.last_summary.clear();
        Ok(())
    }

    fn will_perform_sweep(&mut self, ctx: &SweepContext) -> Result<()> {
        self.sweep_ordinal = ctx.ordinal;
        self.scans_seen = 0;
        self.stats = vec![IncrementalStats::new(); self.channel_names.len()];
        Ok(())
    }

    fn data_is_available(&mut self, data: &SweepData) -> Result<()> {
        let scaled = data.scaled_analog;
        if self.stats.len() < scaled.cols() {
            self.stats.resize(scaled.cols(), IncrementalStats::new());
        }
        for row in scaled.iter_rows() {
            for (stat, &value) in self.stats.iter_mut().zip(row) {
                stat.push(value);
            }
        }
        self.scans_seen += data.scan_count() as u64;
        Ok(())
    }

    fn did_complete_sweep(&mut self) -> Result<()> {
        self.last_summary = self
            .channel_names
            .iter()
            .cloned()
            .zip(self.stats.iter().copied())
            .collect();
        for (name, stat) in &self.last_summary {
            let (min, max, avg) = stat.as_tuple();
            tracing::info!(
                "Sweep {} {}: min {:.4} max {:.4} mean {:.4} ({} samples)",
                self.sweep_ordinal,
                name,
                min,
                max,
                avg,
                stat.count
            );
        }
        Ok(())
    }

    fn did_abort_sweep(&mut self, _reason: AbortReason) -> Result<()> {
        self.stats.iter_mut().for_each(IncrementalStats::reset);
        self.scans_seen = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalogChannel, ControllerConfig};
    use crate::types::Matrix;

    #[test]
    fn test_stats_per_channel() {
        let mut config = ControllerConfig::default();
        config.acquisition.channels = vec![AnalogChannel::new("AI0"), AnalogChannel::new("AI1")];
        let mut monitor = MonitorSubsystem::new();
        monitor
            .will_perform_run(&RunContext {
                config: &config,
                sweeps_per_run: 1,
            })
            .unwrap();
        monitor.will_perform_sweep(&SweepContext { ordinal: 1 }).unwrap();

        let scaled = Matrix::from_rows(&[vec![1.0, -1.0], vec![3.0, f64::NAN]]).unwrap();
        let raw = Matrix::zeros(2, 2);
        let digital = Matrix::zeros(2, 0);
        monitor
            .data_is_available(&SweepData {
                is_finite_sweep: true,
                elapsed_in_sweep: 0.1,
                scan_index: 0,
                scaled_analog: &scaled,
                raw_analog: &raw,
                raw_digital: &digital,
                time_since_run_start: 0.1,
            })
            .unwrap();
        monitor.did_complete_sweep().unwrap();

        assert_eq!(monitor.scans_seen(), 2);
        let summary = monitor.last_summary();
        assert_eq!(summary[0].0, "AI0");
        assert_eq!(summary[0].1.average(), 2.0);
        // NaN from a zero-scale channel is skipped
        assert_eq!(summary[1].1.count, 1);
    }
}
