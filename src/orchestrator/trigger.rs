//! Master trigger: the pulse that starts a sweep on every armed device

use crate::error::{Result, SweepCtlError};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Source of the per-sweep start pulse
#[cfg_attr(test, mockall::automock)]
pub trait MasterTrigger: Send {
    /// Emit one pulse
    fn pulse(&mut self) -> Result<()>;
}

/// Software trigger that delivers pulses over channels.
///
/// Each pulse sends its 1-based sequence number to every listener.
#[derive(Debug, Default)]
pub struct SoftwareTrigger {
    listeners: Vec<Sender<u32>>,
    pulses: u32,
}

impl SoftwareTrigger {
    /// Trigger plus one receiving end for a device to listen on
    pub fn connected() -> (Self, Receiver<u32>) {
        let mut trigger = Self::detached();
        let rx = trigger.add_listener();
        (trigger, rx)
    }

    /// Trigger with no listener; pulses are only counted
    pub fn detached() -> Self {
        Self::default()
    }

    /// Another device listening on the same trigger line
    pub fn add_listener(&mut self) -> Receiver<u32> {
        let (tx, rx) = unbounded();
        self.listeners.push(tx);
        rx
    }

    /// Pulses emitted so far
    pub fn pulse_count(&self) -> u32 {
        self.pulses
    }
}

impl MasterTrigger for SoftwareTrigger {
    fn pulse(&mut self) -> Result<()> {
        self.pulses += 1;
        tracing::debug!("Master trigger pulse {}", self.pulses);
        for tx in &self.listeners {
            tx.send(self.pulses)
                .map_err(|_| SweepCtlError::Channel("trigger listener disconnected".to_string()))?;
        }
        Ok(())
    }
}
