//! Data-file subsystem: one text file per sweep.
//!
//! Built from [`LoggingSettings`]. Each sweep gets `<base>_<NNNN>.csv` under
//! the configured directory, with a header naming the active channels and
//! one row per scan: sweep-relative time followed by the scaled values.
//! Aborted sweeps keep whatever was written.

use super::{RunContext, Subsystem, SweepContext, SweepData};
use crate::config::LoggingSettings;
use crate::error::{Result, ResultExt, SweepCtlError};
use crate::types::AbortReason;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes scaled sweep data to per-sweep files
pub struct LoggingSubsystem {
    settings: LoggingSettings,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    next_sweep_index: u32,
    sample_rate: f64,
    column_names: Vec<String>,
    rows_written: u64,
    files_written: Vec<PathBuf>,
}

impl LoggingSubsystem {
    pub fn new(settings: LoggingSettings) -> Self {
        let next_sweep_index = settings.next_sweep_index;
        Self {
            settings,
            writer: None,
            current_path: None,
            next_sweep_index,
            sample_rate: 1.0,
            column_names: Vec::new(),
            rows_written: 0,
            files_written: Vec::new(),
        }
    }

    /// Index the next sweep's file will carry
    pub fn next_sweep_index(&self) -> u32 {
        self.next_sweep_index
    }

    /// Files opened so far, in order
    pub fn files_written(&self) -> &[PathBuf] {
        &self.files_written
    }

    /// Directory the files go to
    pub fn directory(&self) -> &Path {
        &self.settings.directory
    }

    fn close_file(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(SweepCtlError::from)
                .context("Failed to flush data file")?;
            tracing::debug!(
                "Closed data file {:?} ({} rows)",
                self.current_path,
                self.rows_written
            );
        }
        self.current_path = None;
        Ok(())
    }
}

impl Subsystem for LoggingSubsystem {
    fn name(&self) -> &str {
        "Logging"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn will_perform_run(&mut self, ctx: &RunContext) -> Result<()> {
        std::fs::create_dir_all(&self.settings.directory).map_err(|e| {
            SweepCtlError::Config(format!(
                "Failed to create data directory {:?}: {}",
                self.settings.directory, e
            ))
        })?;
        self.sample_rate = ctx.config.acquisition.sample_rate;
        self.column_names = ctx
            .config
            .acquisition
            .active_channels()
            .map(|c| format!("{} ({})", c.name, c.units))
            .collect();
        tracing::info!(
            "Logging {} sweep(s) to {:?} starting at index {}",
            ctx.sweeps_per_run,
            self.settings.directory,
            self.next_sweep_index
        );
        Ok(())
    }

    fn will_perform_sweep(&mut self, ctx: &SweepContext) -> Result<()> {
        self.close_file()?;
        let path = self
            .settings
            .directory
            .join(self.settings.file_name_for_sweep(self.next_sweep_index));
        let file = File::create(&path)
            .map_err(SweepCtlError::from)
            .with_context(|| format!("Failed to create data file {:?}", path))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "# sweep {} (ordinal {})", self.next_sweep_index, ctx.ordinal)?;
        let mut header = String::from("time_s");
        for name in &self.column_names {
            header.push(',');
            header.push_str(name);
        }
        writeln!(writer, "{}", header)?;

        self.writer = Some(writer);
        self.files_written.push(path.clone());
        self.current_path = Some(path);
        self.rows_written = 0;
        Ok(())
    }

    fn data_is_available(&mut self, data: &SweepData) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let dt = 1.0 / self.sample_rate;
        for (i, row) in data.scaled_analog.iter_rows().enumerate() {
            let t = (data.scan_index + i as u64) as f64 * dt;
            write!(writer, "{:.6}", t)?;
            for value in row {
                write!(writer, ",{}", value)?;
            }
            writeln!(writer)?;
        }
        self.rows_written += data.scaled_analog.rows() as u64;
        Ok(())
    }

    fn did_complete_sweep(&mut self) -> Result<()> {
        self.close_file()?;
        self.next_sweep_index += 1;
        Ok(())
    }

    fn did_abort_sweep(&mut self, reason: AbortReason) -> Result<()> {
        if let Some(path) = &self.current_path {
            tracing::info!("Sweep aborted ({}); keeping partial file {:?}", reason, path);
        }
        self.close_file()?;
        self.next_sweep_index += 1;
        Ok(())
    }

    fn did_complete_run(&mut self) -> Result<()> {
        self.close_file()
    }

    fn did_abort_run(&mut self, _reason: AbortReason) -> Result<()> {
        self.close_file()
    }

    fn release_hardware_resources(&mut self) {
        if let Err(e) = self.close_file() {
            tracing::warn!("Failed to close data file on release: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalogChannel, ControllerConfig};
    use crate::types::Matrix;
    use tempfile::TempDir;

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.acquisition.sample_rate = 1000.0;
        config.acquisition.channels = vec![
            AnalogChannel::new("AI0").with_scale(1.0, "mV"),
            AnalogChannel::new("AI1").inactive(),
        ];
        config
    }

    fn logging_in(dir: &TempDir) -> LoggingSubsystem {
        LoggingSubsystem::new(LoggingSettings {
            enabled: true,
            directory: dir.path().join("data"),
            base_name: "cell".into(),
            next_sweep_index: 3,
            log_directory: None,
        })
    }

    #[test]
    fn test_writes_one_file_per_sweep() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut logging = logging_in(&dir);

        logging
            .will_perform_run(&RunContext {
                config: &config,
                sweeps_per_run: 2,
            })
            .unwrap();

        let scaled = Matrix::from_rows(&[vec![0.5], vec![1.5]]).unwrap();
        let raw = Matrix::from_rows(&[vec![5i16], vec![15]]).unwrap();
        let digital = Matrix::zeros(2, 0);
        for ordinal in 1..=2 {
            logging.will_perform_sweep(&SweepContext { ordinal }).unwrap();
            logging
                .data_is_available(&SweepData {
                    is_finite_sweep: true,
                    elapsed_in_sweep: 0.0,
                    scan_index: 0,
                    scaled_analog: &scaled,
                    raw_analog: &raw,
                    raw_digital: &digital,
                    time_since_run_start: 0.0,
                })
                .unwrap();
            logging.did_complete_sweep().unwrap();
        }
        logging.did_complete_run().unwrap();

        assert_eq!(logging.next_sweep_index(), 5);
        let files = logging.files_written();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("cell_0003.csv"));
        assert!(files[1].ends_with("cell_0004.csv"));

        let content = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "time_s,AI0 (mV)");
        assert_eq!(lines[2], "0.000000,0.5");
        assert_eq!(lines[3], "0.001000,1.5");
    }

    #[test]
    fn test_disabled_by_default() {
        let logging = LoggingSubsystem::new(LoggingSettings::default());
        assert!(!logging.is_enabled());
    }
}
