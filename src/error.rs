//! Error handling for the sweep controller
//!
//! This module defines the controller's error type and a Result alias for use
//! throughout the crate. The variants follow the failure taxonomy of a run:
//! remote-call failures, data-continuity failures, subsystem failures and
//! the imaging handshake.

use crate::rpc::RpcErrorKind;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Error, Debug)]
pub enum SweepCtlError {
    /// A remote process answered a call with an error reply
    #[error("Remote call '{method}' failed: {error}")]
    Rpc {
        /// Method that was called
        method: String,
        /// Error descriptor returned by the remote
        error: RpcErrorKind,
    },

    /// The RPC link itself failed (connection lost, malformed frame, ...)
    #[error("RPC transport error: {0}")]
    RpcTransport(String),

    /// A chunk arrived with a scan index past the expected one
    #[error("Missed {gap} scans: expected scan index {expected}, got {actual}")]
    MissedScans {
        /// Expected next scan index
        expected: u64,
        /// Scan index carried by the chunk
        actual: u64,
        /// Number of scans that never arrived
        gap: u64,
    },

    /// A chunk arrived with a scan index before the expected one
    #[error("Out-of-order or duplicate scans: expected scan index {expected}, got {actual}")]
    OutOfOrderScans {
        /// Expected next scan index
        expected: u64,
        /// Scan index carried by the chunk
        actual: u64,
    },

    /// A chunk's shape does not match the configured channel layout
    #[error("Channel mismatch: expected {expected} analog channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// A subsystem callback failed
    #[error("Subsystem '{name}' failed: {message}")]
    Subsystem { name: String, message: String },

    /// The imaging-controller handshake failed or timed out
    #[error("Imaging handshake error: {0}")]
    Handshake(String),

    /// The acquisition process reported a failure
    #[error("Acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// The stimulation process reported a failure
    #[error("Stimulation failed: {0}")]
    StimulationFailed(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to Rhai script execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SweepCtlError>,
    },
}

impl SweepCtlError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SweepCtlError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        SweepCtlError::Script(err.to_string())
    }

    /// Wrap a failure raised by the named subsystem
    pub fn subsystem(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SweepCtlError::Subsystem {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error (or the error it wraps) is a data-continuity failure
    pub fn is_continuity_error(&self) -> bool {
        match self {
            SweepCtlError::MissedScans { .. } | SweepCtlError::OutOfOrderScans { .. } => true,
            SweepCtlError::WithContext { source, .. } => source.is_continuity_error(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SweepCtlError {
    fn from(err: serde_json::Error) -> Self {
        SweepCtlError::Serialization(err.to_string())
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, SweepCtlError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SweepCtlError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SweepCtlError::from_rhai_error(e).with_context(f()))
    }
}
