//! Core data types for the sweep controller
//!
//! This module contains the fundamental data structures shared by the
//! orchestrator, the data channel and the subsystems.
//!
//! # Main Types
//!
//! - [`ApplicationState`] - The controller's top-level state
//! - [`AbortReason`] - Why a sweep or run was aborted
//! - [`TriggerSource`] - Opaque key naming the trigger that starts a device
//! - [`DeviceConfiguration`] - Device description required before leaving `NoMdf`
//! - [`Matrix`] - Row-major scans x columns sample buffer
//! - [`ScanChunk`] - One unit of streamed acquisition data
//!
//! # Statistics
//!
//! The [`IncrementalStats`] type provides O(1) updates for running statistics
//! including min, max, and average values as data arrives.

use crate::error::{Result, SweepCtlError};
use serde::{Deserialize, Serialize};

/// Top-level state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ApplicationState {
    /// Freshly created, nothing initialized yet
    #[default]
    Uninitialized,
    /// Waiting for a device configuration
    NoMdf,
    /// Ready to run
    Idle,
    /// A run is in progress
    Running,
    /// Test pulses are being delivered
    TestPulsing,
}

impl ApplicationState {
    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            ApplicationState::Uninitialized => "Uninitialized",
            ApplicationState::NoMdf => "No MDF",
            ApplicationState::Idle => "Idle",
            ApplicationState::Running => "Running",
            ApplicationState::TestPulsing => "Test Pulsing",
        }
    }
}

impl std::fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Why a sweep or run ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The user asked the run to stop
    User,
    /// Something went wrong
    Problem,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::User => write!(f, "user"),
            AbortReason::Problem => write!(f, "problem"),
        }
    }
}

/// Opaque key naming the trigger that starts acquisition or stimulation.
///
/// Two devices share a trigger scheme exactly when their keys compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerSource(pub String);

impl TriggerSource {
    /// Create a trigger source key
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TriggerSource {
    fn default() -> Self {
        Self::new("builtin")
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Machine/device configuration ("MDF")
///
/// Describes the acquisition device and the channels it exposes. The
/// controller stays in [`ApplicationState::NoMdf`] until one is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    /// Device name (e.g. "Dev1")
    pub device_name: String,
    /// Analog input channel names, in column order
    #[serde(default)]
    pub analog_input_channels: Vec<String>,
    /// Digital input line names
    #[serde(default)]
    pub digital_input_lines: Vec<String>,
    /// Analog output channel names
    #[serde(default)]
    pub analog_output_channels: Vec<String>,
}

impl DeviceConfiguration {
    /// Create a device configuration with no channels
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            analog_input_channels: Vec::new(),
            digital_input_lines: Vec::new(),
            analog_output_channels: Vec::new(),
        }
    }

    /// Add analog input channels
    pub fn with_analog_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.analog_input_channels
            .extend(names.into_iter().map(Into::into));
        self
    }
}

/// Row-major sample buffer: one row per scan, one column per channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    /// Create a matrix from row-major data
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(SweepCtlError::Serialization(format!(
                "matrix data length {} does not match {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Create a zero-filled matrix
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Create an empty matrix with the given number of columns
    pub fn empty(cols: usize) -> Self {
        Self::zeros(0, cols)
    }

    /// Build a matrix from a list of rows; all rows must have equal length
    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(SweepCtlError::Serialization(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Number of rows (scans)
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (channels)
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the matrix holds no samples
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the stored data length agrees with the declared shape
    pub fn is_consistent(&self) -> bool {
        self.rows.checked_mul(self.cols) == Some(self.data.len())
    }

    /// Get a single element
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    /// Get one row (scan)
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Iterate over rows
    pub fn iter_rows(&self) -> impl Iterator<Item = &[T]> {
        // chunks(0) panics, so zero-column matrices yield no rows
        self.data.chunks(self.cols.max(1)).take(if self.cols == 0 { 0 } else { self.rows })
    }

    /// Iterate over one column
    pub fn column(&self, col: usize) -> impl Iterator<Item = T> + '_ {
        self.data.iter().skip(col).step_by(self.cols.max(1)).copied()
    }

    /// Raw row-major data
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Copy the given columns, in the given order, into a new matrix
    pub fn select_columns(&self, columns: &[usize]) -> Matrix<T> {
        let mut data = Vec::with_capacity(self.rows * columns.len());
        for row in self.iter_rows() {
            data.extend(columns.iter().map(|&c| row[c]));
        }
        Matrix {
            rows: self.rows,
            cols: columns.len(),
            data,
        }
    }
}

/// One chunk of scans streamed from the acquisition process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanChunk {
    /// Index of the first scan in this chunk, counted from sweep start
    pub scan_index: u64,
    /// Raw analog samples (scans x analog channels)
    pub analog: Matrix<i16>,
    /// Raw digital samples (scans x digital words)
    pub digital: Matrix<u32>,
    /// Seconds since the run started when the chunk was read
    pub time_since_run_start: f64,
}

impl ScanChunk {
    /// Create a chunk with analog data only
    pub fn analog_only(scan_index: u64, analog: Matrix<i16>, time_since_run_start: f64) -> Self {
        let rows = analog.rows();
        Self {
            scan_index,
            analog,
            digital: Matrix::zeros(rows, 0),
            time_since_run_start,
        }
    }

    /// Number of scans carried by this chunk
    pub fn scan_count(&self) -> u64 {
        if self.analog.cols() > 0 {
            self.analog.rows() as u64
        } else {
            self.digital.rows() as u64
        }
    }

    /// Check the chunk is internally consistent
    pub fn validate(&self) -> Result<()> {
        if !self.analog.is_consistent() || !self.digital.is_consistent() {
            return Err(SweepCtlError::Serialization(
                "scan chunk matrix shape does not match its data".to_string(),
            ));
        }
        if self.analog.cols() > 0 && self.digital.cols() > 0 && self.analog.rows() != self.digital.rows()
        {
            return Err(SweepCtlError::Serialization(format!(
                "analog has {} scans but digital has {}",
                self.analog.rows(),
                self.digital.rows()
            )));
        }
        if self.time_since_run_start.is_nan() || self.time_since_run_start < 0.0 {
            return Err(SweepCtlError::Serialization(format!(
                "invalid chunk timestamp {}",
                self.time_since_run_start
            )));
        }
        Ok(())
    }
}

/// Incremental statistics tracker for O(1) updates
#[derive(Debug, Clone, Copy)]
pub struct IncrementalStats {
    /// Current count of values
    pub count: u64,
    /// Running sum for average calculation
    pub sum: f64,
    /// Current minimum value
    pub min: f64,
    /// Current maximum value
    pub max: f64,
}

impl Default for IncrementalStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalStats {
    /// Create a new empty stats tracker
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Add a new value to the statistics. Non-finite values (from a zero
    /// channel scale) are ignored.
    #[inline]
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Get the current average
    #[inline]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Get statistics as (min, max, avg) tuple
    #[inline]
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        if self.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (self.min, self.max, self.average())
        }
    }

    /// Reset the statistics
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_shape_checked() {
        assert!(Matrix::<i16>::new(2, 3, vec![0; 6]).is_ok());
        assert!(Matrix::<i16>::new(2, 3, vec![0; 5]).is_err());
    }

    #[test]
    fn test_select_columns_drops_unselected() {
        let m = Matrix::from_rows(&[vec![1i16, 2, 3], vec![4, 5, 6]]).unwrap();
        let picked = m.select_columns(&[0, 2]);
        assert_eq!(picked.cols(), 2);
        assert_eq!(picked.rows(), 2);
        assert_eq!(picked.row(0), &[1, 3]);
        assert_eq!(picked.row(1), &[4, 6]);
    }

    #[test]
    fn test_column_iteration() {
        let m = Matrix::from_rows(&[vec![1i16, 2], vec![3, 4], vec![5, 6]]).unwrap();
        let col: Vec<i16> = m.column(1).collect();
        assert_eq!(col, vec![2, 4, 6]);
    }

    #[test]
    fn test_scan_count_falls_back_to_digital() {
        let chunk = ScanChunk {
            scan_index: 0,
            analog: Matrix::zeros(0, 0),
            digital: Matrix::zeros(25, 1),
            time_since_run_start: 0.0,
        };
        assert_eq!(chunk.scan_count(), 25);
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn test_chunk_validation_rejects_mismatched_rows() {
        let chunk = ScanChunk {
            scan_index: 0,
            analog: Matrix::zeros(10, 2),
            digital: Matrix::zeros(9, 1),
            time_since_run_start: 0.0,
        };
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn test_overflowing_shape_is_inconsistent() {
        assert!(Matrix::<i16>::new(usize::MAX, 2, vec![]).is_err());

        let json = format!(
            r#"{{"scan_index":0,"analog":{{"rows":{},"cols":3,"data":[]}},"digital":{{"rows":0,"cols":0,"data":[]}},"time_since_run_start":0.0}}"#,
            usize::MAX
        );
        let chunk: ScanChunk = serde_json::from_str(&json).unwrap();
        assert!(!chunk.analog.is_consistent());
        assert!(matches!(chunk.validate(), Err(SweepCtlError::Serialization(_))));
    }

    #[test]
    fn test_chunk_serialization_roundtrip() {
        let chunk = ScanChunk::analog_only(
            500,
            Matrix::from_rows(&[vec![1, -1], vec![2, -2]]).unwrap(),
            0.25,
        );
        let json = serde_json::to_string(&chunk).unwrap();
        let back: ScanChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn test_incremental_stats_skip_non_finite() {
        let mut stats = IncrementalStats::new();
        stats.push(1.0);
        stats.push(f64::INFINITY);
        stats.push(3.0);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average(), 2.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
    }
}
