//! Raw-count to physical-unit conversion
//!
//! Each active channel gets one [`ChannelScaling`]. The linear form computes
//! `raw * (full_scale_volts_per_count * (1 / channel_scale))`; a channel with
//! converter coefficients evaluates the polynomial for volts first and then
//! divides by the channel scale. A channel scale of zero produces `inf` or
//! `NaN` values, which are passed through.
//!
//! Inactive channels are dropped from both the scaled and the raw output.

use crate::config::{AcquisitionSettings, AnalogChannel};
use crate::error::{Result, SweepCtlError};
use crate::types::Matrix;

/// How one channel's counts become physical units
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelScaling {
    /// `raw * factor`
    Linear {
        /// Combined counts-to-units factor
        factor: f64,
    },
    /// `polyval(coefficients, raw) * inverse_scale`
    Polynomial {
        /// Coefficients in ascending power order
        coefficients: Vec<f64>,
        /// `1 / channel_scale`
        inverse_scale: f64,
    },
}

impl ChannelScaling {
    /// Scaling for a channel given the device's linear counts-to-volts factor
    pub fn for_channel(channel: &AnalogChannel, full_scale_volts_per_count: f64) -> Self {
        let inverse_scale = 1.0 / channel.scale;
        match &channel.coefficients {
            Some(coefficients) if !coefficients.is_empty() => ChannelScaling::Polynomial {
                coefficients: coefficients.clone(),
                inverse_scale,
            },
            _ => ChannelScaling::Linear {
                factor: full_scale_volts_per_count * inverse_scale,
            },
        }
    }

    /// Convert one raw sample
    #[inline]
    pub fn apply(&self, raw: i16) -> f64 {
        let x = raw as f64;
        match self {
            ChannelScaling::Linear { factor } => x * factor,
            ChannelScaling::Polynomial {
                coefficients,
                inverse_scale,
            } => {
                // Horner, highest power first
                let volts = coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c);
                volts * inverse_scale
            }
        }
    }
}

/// Output of the scaling stage for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledChunk {
    /// Physical units, active channels only
    pub scaled: Matrix<f64>,
    /// Raw counts, active channels only
    pub raw: Matrix<i16>,
}

/// Converts raw analog chunks for the active channels
#[derive(Debug, Clone)]
pub struct ScalingStage {
    channel_count: usize,
    active_columns: Vec<usize>,
    scalings: Vec<ChannelScaling>,
}

impl ScalingStage {
    /// Build the stage from the acquisition settings
    pub fn from_settings(settings: &AcquisitionSettings) -> Self {
        let mut active_columns = Vec::new();
        let mut scalings = Vec::new();
        for (column, channel) in settings.channels.iter().enumerate() {
            if channel.active {
                active_columns.push(column);
                scalings.push(ChannelScaling::for_channel(
                    channel,
                    settings.full_scale_volts_per_count,
                ));
            }
        }
        Self {
            channel_count: settings.channels.len(),
            active_columns,
            scalings,
        }
    }

    /// Number of configured channels (columns expected in each chunk)
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Columns that survive into the output
    pub fn active_columns(&self) -> &[usize] {
        &self.active_columns
    }

    /// Scale a chunk of raw counts
    pub fn process(&self, analog: &Matrix<i16>) -> Result<ScaledChunk> {
        if analog.cols() != self.channel_count && !(analog.rows() == 0 && analog.cols() == 0) {
            return Err(SweepCtlError::ChannelMismatch {
                expected: self.channel_count,
                actual: analog.cols(),
            });
        }

        let raw = analog.select_columns(&self.active_columns);
        let mut data = Vec::with_capacity(raw.rows() * raw.cols());
        for row in raw.iter_rows() {
            data.extend(
                row.iter()
                    .zip(self.scalings.iter())
                    .map(|(&value, scaling)| scaling.apply(value)),
            );
        }
        let scaled = Matrix::new(raw.rows(), raw.cols(), data)?;
        Ok(ScaledChunk { scaled, raw })
    }
}
