//! Lifecycle participants and the ordered registry that drives them.
//!
//! Two-layer design, as with the data pipeline:
//! - **`Subsystem` trait**: the lifecycle contract every participant
//!   implements; also the extension point for user-defined participants.
//! - **`BuiltinSubsystem` enum**: the participants shipped with the crate.
//!
//! [`SubsystemRegistry`] holds both kinds in one fixed order for the life of
//! the orchestrator. Start and data events go forward through that order and
//! stop at the first error; abort events go in reverse and every failure is
//! logged and suppressed so the remaining participants still hear about the
//! abort.

pub mod logging;
pub mod monitor;
pub mod recording;

pub use logging::LoggingSubsystem;
pub use monitor::MonitorSubsystem;
pub use recording::{Callback, ChunkRecord, Journal, RecordedCall, RecordingSubsystem};

use crate::config::ControllerConfig;
use crate::error::{Result, SweepCtlError};
use crate::types::{AbortReason, Matrix};

/// Passed to `will_perform_run`
pub struct RunContext<'a> {
    /// Configuration in effect for the run
    pub config: &'a ControllerConfig,
    /// Sweeps the run will attempt
    pub sweeps_per_run: u32,
}

/// Passed to `will_perform_sweep`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepContext {
    /// 1-based position of the sweep within the run
    pub ordinal: u32,
}

/// One accepted chunk, as seen by subsystems
pub struct SweepData<'a> {
    /// Whether the sweep has a fixed length
    pub is_finite_sweep: bool,
    /// Seconds since the sweep started
    pub elapsed_in_sweep: f64,
    /// Index of the first scan in the chunk
    pub scan_index: u64,
    /// Physical units, active channels only
    pub scaled_analog: &'a Matrix<f64>,
    /// Raw counts, active channels only
    pub raw_analog: &'a Matrix<i16>,
    /// Raw digital words
    pub raw_digital: &'a Matrix<u32>,
    /// Seconds since the run started, as stamped by the acquisition process
    pub time_since_run_start: f64,
}

impl SweepData<'_> {
    /// Number of scans in the chunk
    pub fn scan_count(&self) -> usize {
        if self.raw_analog.cols() > 0 {
            self.raw_analog.rows()
        } else {
            self.raw_digital.rows()
        }
    }
}

/// Lifecycle contract of a run participant.
///
/// Every method must be safe to call with no hardware attached.
pub trait Subsystem: Send {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the subsystem takes part in fan-outs
    fn is_enabled(&self) -> bool {
        true
    }

    fn will_perform_run(&mut self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    fn will_perform_sweep(&mut self, _ctx: &SweepContext) -> Result<()> {
        Ok(())
    }

    fn data_is_available(&mut self, _data: &SweepData) -> Result<()> {
        Ok(())
    }

    fn did_complete_sweep(&mut self) -> Result<()> {
        Ok(())
    }

    fn did_abort_sweep(&mut self, _reason: AbortReason) -> Result<()> {
        Ok(())
    }

    fn did_complete_run(&mut self) -> Result<()> {
        Ok(())
    }

    fn did_abort_run(&mut self, _reason: AbortReason) -> Result<()> {
        Ok(())
    }

    /// Let go of any device handles; called once at teardown
    fn release_hardware_resources(&mut self) {}
}

/// Participants shipped with the crate
pub enum BuiltinSubsystem {
    Logging(LoggingSubsystem),
    Monitor(MonitorSubsystem),
    Recording(RecordingSubsystem),
}

impl BuiltinSubsystem {
    fn as_subsystem(&mut self) -> &mut dyn Subsystem {
        match self {
            BuiltinSubsystem::Logging(s) => s,
            BuiltinSubsystem::Monitor(s) => s,
            BuiltinSubsystem::Recording(s) => s,
        }
    }

    fn as_subsystem_ref(&self) -> &dyn Subsystem {
        match self {
            BuiltinSubsystem::Logging(s) => s,
            BuiltinSubsystem::Monitor(s) => s,
            BuiltinSubsystem::Recording(s) => s,
        }
    }
}

/// Either a built-in participant or a user-supplied one
pub enum AnySubsystem {
    Builtin(BuiltinSubsystem),
    Plugin(Box<dyn Subsystem>),
}

impl AnySubsystem {
    fn get(&self) -> &dyn Subsystem {
        match self {
            AnySubsystem::Builtin(s) => s.as_subsystem_ref(),
            AnySubsystem::Plugin(s) => s.as_ref(),
        }
    }

    fn get_mut(&mut self) -> &mut dyn Subsystem {
        match self {
            AnySubsystem::Builtin(s) => s.as_subsystem(),
            AnySubsystem::Plugin(s) => s.as_mut(),
        }
    }
}

impl From<LoggingSubsystem> for AnySubsystem {
    fn from(s: LoggingSubsystem) -> Self {
        AnySubsystem::Builtin(BuiltinSubsystem::Logging(s))
    }
}

impl From<MonitorSubsystem> for AnySubsystem {
    fn from(s: MonitorSubsystem) -> Self {
        AnySubsystem::Builtin(BuiltinSubsystem::Monitor(s))
    }
}

impl From<RecordingSubsystem> for AnySubsystem {
    fn from(s: RecordingSubsystem) -> Self {
        AnySubsystem::Builtin(BuiltinSubsystem::Recording(s))
    }
}

impl From<Box<dyn Subsystem>> for AnySubsystem {
    fn from(s: Box<dyn Subsystem>) -> Self {
        AnySubsystem::Plugin(s)
    }
}

fn attribute(name: &str, event: &str, err: SweepCtlError) -> SweepCtlError {
    match err {
        err @ SweepCtlError::Subsystem { .. } => err,
        other => SweepCtlError::subsystem(name, format!("{}: {}", event, other)),
    }
}

/// Ordered, fixed set of lifecycle participants
#[derive(Default)]
pub struct SubsystemRegistry {
    members: Vec<AnySubsystem>,
}

impl SubsystemRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a participant; registration order is fan-out order
    pub fn register(&mut self, subsystem: impl Into<AnySubsystem>) {
        let subsystem = subsystem.into();
        tracing::debug!(
            "Registered subsystem '{}' at position {}",
            subsystem.get().name(),
            self.members.len()
        );
        self.members.push(subsystem);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, subsystem: impl Into<AnySubsystem>) -> Self {
        self.register(subsystem);
        self
    }

    /// Number of registered participants
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Names in registry order
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.get().name().to_string()).collect()
    }

    fn forward<F>(&mut self, event: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&mut dyn Subsystem) -> Result<()>,
    {
        for member in self.members.iter_mut() {
            let subsystem = member.get_mut();
            if !subsystem.is_enabled() {
                continue;
            }
            if let Err(e) = f(&mut *subsystem) {
                return Err(attribute(subsystem.name(), event, e));
            }
        }
        Ok(())
    }

    fn reverse_suppressing<F>(&mut self, event: &str, mut f: F) -> usize
    where
        F: FnMut(&mut dyn Subsystem) -> Result<()>,
    {
        let mut failures = 0;
        for member in self.members.iter_mut().rev() {
            let subsystem = member.get_mut();
            if !subsystem.is_enabled() {
                continue;
            }
            if let Err(e) = f(&mut *subsystem) {
                failures += 1;
                tracing::warn!(
                    "Subsystem '{}' failed during {}; continuing: {}",
                    subsystem.name(),
                    event,
                    e
                );
            }
        }
        failures
    }

    pub fn will_perform_run(&mut self, ctx: &RunContext) -> Result<()> {
        self.forward("will_perform_run", |s| s.will_perform_run(ctx))
    }

    pub fn will_perform_sweep(&mut self, ctx: &SweepContext) -> Result<()> {
        self.forward("will_perform_sweep", |s| s.will_perform_sweep(ctx))
    }

    pub fn data_is_available(&mut self, data: &SweepData) -> Result<()> {
        self.forward("data_is_available", |s| s.data_is_available(data))
    }

    pub fn did_complete_sweep(&mut self) -> Result<()> {
        self.forward("did_complete_sweep", |s| s.did_complete_sweep())
    }

    pub fn did_complete_run(&mut self) -> Result<()> {
        self.forward("did_complete_run", |s| s.did_complete_run())
    }

    /// Reverse order; returns how many participants failed
    pub fn did_abort_sweep(&mut self, reason: AbortReason) -> usize {
        self.reverse_suppressing("did_abort_sweep", |s| s.did_abort_sweep(reason))
    }

    /// Reverse order; returns how many participants failed
    pub fn did_abort_run(&mut self, reason: AbortReason) -> usize {
        self.reverse_suppressing("did_abort_run", |s| s.did_abort_run(reason))
    }

    /// Release every participant's hardware, last registered first.
    ///
    /// Disabled participants are released too.
    pub fn release_hardware_resources(&mut self) {
        for member in self.members.iter_mut().rev() {
            let subsystem = member.get_mut();
            tracing::debug!("Releasing hardware for '{}'", subsystem.name());
            subsystem.release_hardware_resources();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(journal: &Journal, names: &[&str]) -> SubsystemRegistry {
        let mut registry = SubsystemRegistry::new();
        for name in names {
            registry.register(RecordingSubsystem::new(*name, journal.clone()));
        }
        registry
    }

    #[test]
    fn test_start_events_run_forward() {
        let journal = Journal::new();
        let mut registry = registry_with(&journal, &["a", "b", "c"]);
        registry.will_perform_sweep(&SweepContext { ordinal: 1 }).unwrap();
        assert_eq!(
            journal.order_of(Callback::WillPerformSweep),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_abort_events_run_in_reverse() {
        let journal = Journal::new();
        let mut registry = registry_with(&journal, &["a", "b", "c"]);
        registry.did_abort_sweep(AbortReason::User);
        registry.did_abort_run(AbortReason::User);
        assert_eq!(journal.order_of(Callback::DidAbortSweep), vec!["c", "b", "a"]);
        assert_eq!(journal.order_of(Callback::DidAbortRun), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_abort_failure_is_suppressed() {
        let journal = Journal::new();
        let mut registry = SubsystemRegistry::new()
            .with(RecordingSubsystem::new("a", journal.clone()))
            .with(RecordingSubsystem::new("b", journal.clone()).fail_on(Callback::DidAbortRun))
            .with(RecordingSubsystem::new("c", journal.clone()));

        let failures = registry.did_abort_run(AbortReason::Problem);
        assert_eq!(failures, 1);
        assert_eq!(journal.order_of(Callback::DidAbortRun), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_start_failure_stops_fan_out() {
        let journal = Journal::new();
        let mut registry = SubsystemRegistry::new()
            .with(RecordingSubsystem::new("a", journal.clone()))
            .with(RecordingSubsystem::new("b", journal.clone()).fail_on(Callback::DidCompleteSweep))
            .with(RecordingSubsystem::new("c", journal.clone()));

        let err = registry.did_complete_sweep().unwrap_err();
        assert!(matches!(err, SweepCtlError::Subsystem { ref name, .. } if name == "b"));
        assert_eq!(journal.order_of(Callback::DidCompleteSweep), vec!["a", "b"]);
    }

    #[test]
    fn test_disabled_members_skipped() {
        let journal = Journal::new();
        let mut registry = SubsystemRegistry::new()
            .with(RecordingSubsystem::new("a", journal.clone()))
            .with(RecordingSubsystem::new("b", journal.clone()).disabled());

        registry.did_complete_run().unwrap();
        registry.did_abort_run(AbortReason::User);
        registry.release_hardware_resources();
        assert_eq!(journal.order_of(Callback::DidCompleteRun), vec!["a"]);
        assert_eq!(journal.order_of(Callback::DidAbortRun), vec!["a"]);
        assert_eq!(
            journal.order_of(Callback::ReleaseHardwareResources),
            vec!["b", "a"]
        );
    }

    struct Plugin;

    impl Subsystem for Plugin {
        fn name(&self) -> &str {
            "plugin"
        }
    }

    #[test]
    fn test_plugin_subsystem_uses_default_callbacks() {
        let journal = Journal::new();
        let mut registry = SubsystemRegistry::new()
            .with(Box::new(Plugin) as Box<dyn Subsystem>)
            .with(RecordingSubsystem::new("rec", journal.clone()));
        assert_eq!(registry.names(), vec!["plugin", "rec"]);
        registry.did_complete_sweep().unwrap();
        assert_eq!(journal.count(Callback::DidCompleteSweep), 1);
    }
}
