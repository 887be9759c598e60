//! User hooks and the host event pump

use crate::subsystem::SweepData;
use crate::types::AbortReason;

/// User code invoked at fixed points of a run.
///
/// Hooks observe; they cannot fail the run. Every method defaults to a no-op.
pub trait UserHooks: Send {
    fn run_will_start(&mut self) {}

    fn sweep_will_start(&mut self, _ordinal: u32) {}

    fn data_available(&mut self, _data: &SweepData) {}

    fn sweep_did_complete(&mut self, _ordinal: u32) {}

    fn sweep_did_abort(&mut self, _ordinal: u32, _reason: AbortReason) {}

    fn run_did_complete(&mut self, _sweeps_completed: u32) {}

    fn run_did_abort(&mut self, _reason: AbortReason) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl UserHooks for NoHooks {}

/// Called once per polling tick so a host UI can process its own events
pub trait EventPump: Send {
    fn pump(&mut self);
}

impl<F> EventPump for F
where
    F: FnMut() + Send,
{
    fn pump(&mut self) {
        self()
    }
}
