//! File-based handshake with an external imaging controller
//!
//! Before a run the controller writes a command file describing the run and
//! waits for the imaging side to write `OK` into a response file. Any other
//! response, or no response within the timeout, fails the run before the
//! first sweep.

use crate::config::{ImagingSettings, LoggingSettings};
use crate::error::{Result, ResultExt, SweepCtlError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const COMMAND_FILE: &str = "si_command.txt";
const RESPONSE_FILE: &str = "si_response.txt";

/// Run description written to the command file
#[derive(Debug, Clone, PartialEq)]
pub struct ArmRequest {
    pub first_acquisition_index: u32,
    pub acquisition_count: u32,
    pub logging_enabled: bool,
    pub data_file_name: String,
    pub data_directory: PathBuf,
}

impl ArmRequest {
    /// Describe a run of `sweeps` sweeps logged per `logging`
    pub fn for_run(logging: &LoggingSettings, sweeps: u32) -> Self {
        Self {
            first_acquisition_index: logging.next_sweep_index,
            acquisition_count: sweeps,
            logging_enabled: logging.enabled,
            data_file_name: logging.file_name_for_sweep(logging.next_sweep_index),
            data_directory: logging.directory.clone(),
        }
    }

    /// Text of the command file
    pub fn command_text(&self) -> String {
        format!(
            "Arming\n\
             Index of first acq in set| {}\n\
             Number of acqs in set| {}\n\
             Logging enabled| {}\n\
             Wavesurfer data file name| {}\n\
             Wavesurfer data file dir| {}\n\
             End\n",
            self.first_acquisition_index,
            self.acquisition_count,
            u8::from(self.logging_enabled),
            self.data_file_name,
            self.data_directory.display()
        )
    }
}

/// Command/response file pair
#[derive(Debug, Clone)]
pub struct ImagingHandshake {
    command_path: PathBuf,
    response_path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl ImagingHandshake {
    /// Files default to the system temp directory
    pub fn from_settings(settings: &ImagingSettings) -> Self {
        let tmp = std::env::temp_dir();
        Self {
            command_path: settings
                .command_path
                .clone()
                .unwrap_or_else(|| tmp.join(COMMAND_FILE)),
            response_path: settings
                .response_path
                .clone()
                .unwrap_or_else(|| tmp.join(RESPONSE_FILE)),
            timeout: Duration::from_millis(settings.timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        }
    }

    pub fn command_path(&self) -> &Path {
        &self.command_path
    }

    pub fn response_path(&self) -> &Path {
        &self.response_path
    }

    /// Write the command and wait for the imaging side to acknowledge it
    pub fn arm(&self, request: &ArmRequest) -> Result<()> {
        if self.response_path.exists() {
            std::fs::remove_file(&self.response_path)
                .map_err(SweepCtlError::from)
                .with_context(|| format!("Failed to remove stale {:?}", self.response_path))?;
        }

        std::fs::write(&self.command_path, request.command_text())
            .map_err(SweepCtlError::from)
            .with_context(|| format!("Failed to write {:?}", self.command_path))?;
        tracing::info!(
            "Arming imaging for {} acquisition(s) starting at {}",
            request.acquisition_count,
            request.first_acquisition_index
        );

        // The response file may be caught half-written, so anything other
        // than "OK" is only final at the deadline
        let deadline = Instant::now() + self.timeout;
        let mut last = String::new();
        loop {
            if let Some(response) = self.read_response() {
                let response = response.trim();
                if response == "OK" {
                    tracing::debug!("Imaging acknowledged");
                    return Ok(());
                }
                if !response.is_empty() && response != last {
                    tracing::trace!("Imaging response so far: '{}'", response);
                    last = response.to_string();
                }
            }
            if Instant::now() >= deadline {
                return Err(SweepCtlError::Handshake(if last.is_empty() {
                    format!(
                        "no response in {:?} after {} ms",
                        self.response_path,
                        self.timeout.as_millis()
                    )
                } else {
                    format!(
                        "unexpected response '{}' after {} ms",
                        last,
                        self.timeout.as_millis()
                    )
                }));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn read_response(&self) -> Option<String> {
        std::fs::read_to_string(&self.response_path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn handshake_in(dir: &TempDir, timeout_ms: u64) -> ImagingHandshake {
        ImagingHandshake::from_settings(&ImagingSettings {
            enabled: true,
            command_path: Some(dir.path().join("cmd.txt")),
            response_path: Some(dir.path().join("resp.txt")),
            timeout_ms,
            poll_interval_ms: 5,
        })
    }

    fn request() -> ArmRequest {
        ArmRequest {
            first_acquisition_index: 7,
            acquisition_count: 3,
            logging_enabled: true,
            data_file_name: "cell_0007.csv".into(),
            data_directory: PathBuf::from("/data"),
        }
    }

    #[test]
    fn test_command_text_layout() {
        let text = request().command_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Arming",
                "Index of first acq in set| 7",
                "Number of acqs in set| 3",
                "Logging enabled| 1",
                "Wavesurfer data file name| cell_0007.csv",
                "Wavesurfer data file dir| /data",
                "End",
            ]
        );
    }

    #[test]
    fn test_ok_response_succeeds() {
        let dir = TempDir::new().unwrap();
        let handshake = handshake_in(&dir, 2_000);
        let response = handshake.response_path().to_path_buf();
        let command = handshake.command_path().to_path_buf();

        let responder = std::thread::spawn(move || {
            let start = Instant::now();
            while !command.exists() && start.elapsed() < Duration::from_secs(2) {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::fs::write(&response, "OK\n").unwrap();
        });

        handshake.arm(&request()).unwrap();
        responder.join().unwrap();
        let written = std::fs::read_to_string(handshake.command_path()).unwrap();
        assert!(written.starts_with("Arming\n"));
    }

    #[test]
    fn test_timeout_is_handshake_error() {
        let dir = TempDir::new().unwrap();
        let handshake = handshake_in(&dir, 30);
        let err = handshake.arm(&request()).unwrap_err();
        assert!(matches!(err, SweepCtlError::Handshake(_)));
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let dir = TempDir::new().unwrap();
        let handshake = handshake_in(&dir, 30);
        std::fs::write(handshake.response_path(), "OK").unwrap();
        assert!(handshake.arm(&request()).is_err());
    }

    #[test]
    fn test_partial_response_is_read_again() {
        let dir = TempDir::new().unwrap();
        let handshake = handshake_in(&dir, 2_000);
        let response = handshake.response_path().to_path_buf();
        let command = handshake.command_path().to_path_buf();
        let responder = std::thread::spawn(move || {
            while !command.exists() {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::fs::write(&response, "O").unwrap();
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&response, "OK\n").unwrap();
        });
        handshake.arm(&request()).unwrap();
        responder.join().unwrap();
    }

    #[test]
    fn test_other_response_is_rejected() {
        let dir = TempDir::new().unwrap();
        let handshake = handshake_in(&dir, 200);
        let response = handshake.response_path().to_path_buf();
        let command = handshake.command_path().to_path_buf();
        let responder = std::thread::spawn(move || {
            while !command.exists() {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::fs::write(&response, "BUSY").unwrap();
        });
        let err = handshake.arm(&request()).unwrap_err();
        responder.join().unwrap();
        assert!(matches!(err, SweepCtlError::Handshake(ref m) if m.contains("BUSY")));
    }

    #[test]
    #[serial]
    fn test_default_paths_in_temp_dir() {
        let handshake = ImagingHandshake::from_settings(&ImagingSettings::default());
        let tmp = std::env::temp_dir();
        assert_eq!(handshake.command_path(), tmp.join(COMMAND_FILE));
        assert_eq!(handshake.response_path(), tmp.join(RESPONSE_FILE));
    }
}
