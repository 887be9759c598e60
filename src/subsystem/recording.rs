//! Recording subsystem for tests and dry runs
//!
//! Appends every callback it receives to a shared [`Journal`] so a test can
//! assert on fan-out order across several participants. It can also be told
//! to fail on a chosen callback to exercise the error paths.

use super::{RunContext, Subsystem, SweepContext, SweepData};
use crate::error::{Result, SweepCtlError};
use crate::types::AbortReason;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle callback names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callback {
    WillPerformRun,
    WillPerformSweep,
    DataIsAvailable,
    DidCompleteSweep,
    DidAbortSweep,
    DidCompleteRun,
    DidAbortRun,
    ReleaseHardwareResources,
}

/// One journal entry
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Subsystem that received the callback
    pub subsystem: String,
    /// Which callback
    pub callback: Callback,
    /// Abort reason, for the abort callbacks
    pub reason: Option<AbortReason>,
    /// Sweep ordinal, for `will_perform_sweep`
    pub ordinal: Option<u32>,
}

/// Summary of one `data_is_available` call
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Subsystem that received the chunk
    pub subsystem: String,
    /// First scan index of the chunk
    pub scan_index: u64,
    /// Scans in the chunk
    pub scan_count: usize,
    /// Columns of scaled data delivered
    pub scaled_columns: usize,
    /// First scaled sample of the chunk, if any
    pub first_scaled: Option<f64>,
    /// Whether the sweep was finite
    pub is_finite_sweep: bool,
}

#[derive(Debug, Default)]
struct JournalInner {
    calls: Vec<RecordedCall>,
    chunks: Vec<ChunkRecord>,
}

/// Shared, cloneable callback log
#[derive(Debug, Clone, Default)]
pub struct Journal {
    inner: Arc<Mutex<JournalInner>>,
}

impl Journal {
    /// Empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JournalInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: RecordedCall) {
        self.lock().calls.push(call);
    }

    /// Every callback, in the order received
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Every chunk delivered, in the order received
    pub fn chunks(&self) -> Vec<ChunkRecord> {
        self.lock().chunks.clone()
    }

    /// Subsystem names that received `callback`, in order
    pub fn order_of(&self, callback: Callback) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.callback == callback)
            .map(|c| c.subsystem.clone())
            .collect()
    }

    /// How many times `callback` was received, across all subsystems
    pub fn count(&self, callback: Callback) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.callback == callback)
            .count()
    }

    /// How many times `subsystem` received `callback`
    pub fn count_for(&self, subsystem: &str, callback: Callback) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.callback == callback && c.subsystem == subsystem)
            .count()
    }

    /// Callbacks received by one subsystem, in order
    pub fn callbacks_of(&self, subsystem: &str) -> Vec<Callback> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.subsystem == subsystem)
            .map(|c| c.callback)
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.calls.clear();
        inner.chunks.clear();
    }
}

/// Subsystem that journals its callbacks
pub struct RecordingSubsystem {
    name: String,
    journal: Journal,
    enabled: bool,
    fail_on: Option<Callback>,
}

impl RecordingSubsystem {
    /// Enabled recorder writing to `journal`
    pub fn new(name: impl Into<String>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            journal,
            enabled: true,
            fail_on: None,
        }
    }

    /// Fail every time `callback` is received (after journaling it)
    pub fn fail_on(mut self, callback: Callback) -> Self {
        self.fail_on = Some(callback);
        self
    }

    /// Start disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn note(&self, callback: Callback, reason: Option<AbortReason>, ordinal: Option<u32>) -> Result<()> {
        self.journal.record(RecordedCall {
            subsystem: self.name.clone(),
            callback,
            reason,
            ordinal,
        });
        if self.fail_on == Some(callback) {
            return Err(SweepCtlError::subsystem(
                &self.name,
                format!("injected failure in {:?}", callback),
            ));
        }
        Ok(())
    }
}

impl Subsystem for RecordingSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn will_perform_run(&mut self, _ctx: &RunContext) -> Result<()> {
        self.note(Callback::WillPerformRun, None, None)
    }

    fn will_perform_sweep(&mut self, ctx: &SweepContext) -> Result<()> {
        self.note(Callback::WillPerformSweep, None, Some(ctx.ordinal))
    }

    fn data_is_available(&mut self, data: &SweepData) -> Result<()> {
        self.journal.lock().chunks.push(ChunkRecord {
            subsystem: self.name.clone(),
            scan_index: data.scan_index,
            scan_count: data.scan_count(),
            scaled_columns: data.scaled_analog.cols(),
            first_scaled: data.scaled_analog.get(0, 0),
            is_finite_sweep: data.is_finite_sweep,
        });
        self.note(Callback::DataIsAvailable, None, None)
    }

    fn did_complete_sweep(&mut self) -> Result<()> {
        self.note(Callback::DidCompleteSweep, None, None)
    }

    fn did_abort_sweep(&mut self, reason: AbortReason) -> Result<()> {
        self.note(Callback::DidAbortSweep, Some(reason), None)
    }

    fn did_complete_run(&mut self) -> Result<()> {
        self.note(Callback::DidCompleteRun, None, None)
    }

    fn did_abort_run(&mut self, reason: AbortReason) -> Result<()> {
        self.note(Callback::DidAbortRun, Some(reason), None)
    }

    fn release_hardware_resources(&mut self) {
        self.journal.record(RecordedCall {
            subsystem: self.name.clone(),
            callback: Callback::ReleaseHardwareResources,
            reason: None,
            ordinal: None,
        });
    }
}
