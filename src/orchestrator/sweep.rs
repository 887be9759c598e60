//! Per-sweep bookkeeping and the sweep-completion decision

use crate::error::SweepCtlError;
use crate::rpc::{methods, RpcDelegate, RpcErrorKind, RpcResult};
use serde_json::Value;
use std::time::Instant;

/// Whether the acquisition and stimulation sides are still armed or running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceActivity {
    pub acquisition_active: bool,
    pub stimulation_active: bool,
}

/// Decide whether a sweep is over.
///
/// - stimulation disabled: once acquisition is idle
/// - stimulation on the acquisition trigger: once both are idle
/// - stimulation on its own trigger: once acquisition is idle
pub fn sweep_is_complete(
    stimulation_enabled: bool,
    shares_acquisition_trigger: bool,
    activity: DeviceActivity,
) -> bool {
    if !stimulation_enabled {
        !activity.acquisition_active
    } else if shares_acquisition_trigger {
        !activity.acquisition_active && !activity.stimulation_active
    } else {
        !activity.acquisition_active
    }
}

/// State of the sweep in progress
#[derive(Debug)]
pub struct Sweep {
    /// 1-based position within the run
    pub ordinal: u32,
    /// Seconds since run start at which the sweep began
    pub started_at: f64,
    clock: Instant,
    /// Scans accepted so far
    pub total_scans: u64,
    /// Last time the data channel was drained
    pub last_poll: Instant,
    pub is_sweep_complete: bool,
    pub was_stopped_by_user: bool,
}

impl Sweep {
    /// Begin a sweep
    pub fn start(ordinal: u32, started_at: f64) -> Self {
        let now = Instant::now();
        Self {
            ordinal,
            started_at,
            clock: now,
            total_scans: 0,
            last_poll: now,
            is_sweep_complete: false,
            was_stopped_by_user: false,
        }
    }

    /// Seconds since the sweep began
    pub fn elapsed(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }
}

/// How a sweep ended
#[derive(Debug, Default)]
pub struct SweepReport {
    pub did_complete: bool,
    pub did_user_stop: bool,
    pub error: Option<SweepCtlError>,
}

impl SweepReport {
    pub fn completed() -> Self {
        Self {
            did_complete: true,
            ..Default::default()
        }
    }

    pub fn stopped_by_user() -> Self {
        Self {
            did_user_stop: true,
            ..Default::default()
        }
    }

    pub fn failed(error: SweepCtlError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Tracks device activity for the current sweep and answers the remotes'
/// inbound reports.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    stimulation_enabled: bool,
    shares_acquisition_trigger: bool,
    activity: DeviceActivity,
    complete: bool,
    failure: Option<SweepCtlError>,
}

impl ActivityMonitor {
    pub fn new(stimulation_enabled: bool, shares_acquisition_trigger: bool) -> Self {
        Self {
            stimulation_enabled,
            shares_acquisition_trigger,
            ..Default::default()
        }
    }

    /// Mark both sides armed for a new sweep
    pub fn arm(&mut self) {
        self.activity = DeviceActivity {
            acquisition_active: true,
            stimulation_active: self.stimulation_enabled,
        };
        self.complete = false;
        self.failure = None;
    }

    /// Current activity flags
    pub fn activity(&self) -> DeviceActivity {
        self.activity
    }

    /// Whether the completion decision has fired
    pub fn is_sweep_complete(&self) -> bool {
        self.complete
    }

    /// Take a reported failure, if any
    pub fn take_failure(&mut self) -> Option<SweepCtlError> {
        self.failure.take()
    }

    pub fn acquisition_did_finish(&mut self) {
        tracing::debug!("Acquisition finished");
        self.activity.acquisition_active = false;
        self.check_if_sweep_is_complete();
    }

    pub fn stimulation_did_finish(&mut self) {
        tracing::debug!("Stimulation finished");
        self.activity.stimulation_active = false;
        self.check_if_sweep_is_complete();
    }

    pub fn acquisition_did_fail(&mut self, message: impl Into<String>) {
        self.activity.acquisition_active = false;
        self.failure
            .get_or_insert(SweepCtlError::AcquisitionFailed(message.into()));
    }

    pub fn stimulation_did_fail(&mut self, message: impl Into<String>) {
        self.activity.stimulation_active = false;
        self.failure
            .get_or_insert(SweepCtlError::StimulationFailed(message.into()));
    }

    fn check_if_sweep_is_complete(&mut self) {
        if sweep_is_complete(
            self.stimulation_enabled,
            self.shares_acquisition_trigger,
            self.activity,
        ) {
            self.complete = true;
        }
    }
}

impl RpcDelegate for ActivityMonitor {
    fn dispatch(&mut self, method: &str, args: &Value) -> Option<RpcResult> {
        match method {
            methods::STIMULATION_DID_FINISH => {
                self.stimulation_did_finish();
                Some(Ok(Value::Null))
            }
            methods::STIMULATION_DID_FAIL => {
                let message = match args.get("message").and_then(Value::as_str) {
                    Some(m) => m.to_string(),
                    None => {
                        return Some(Err(RpcErrorKind::bad_arguments(
                            "stimulationDidFail needs a 'message' string",
                        )))
                    }
                };
                tracing::error!("Stimulation reported failure: {}", message);
                self.stimulation_did_fail(message);
                Some(Ok(Value::Null))
            }
            methods::PING => Some(Ok(Value::String("pong".to_string()))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcErrorCode;
    use serde_json::json;

    #[test]
    fn test_completion_with_stimulation_disabled() {
        let mut monitor = ActivityMonitor::new(false, true);
        monitor.arm();
        assert!(!monitor.is_sweep_complete());
        monitor.acquisition_did_finish();
        assert!(monitor.is_sweep_complete());
    }

    #[test]
    fn test_shared_trigger_waits_for_both() {
        let mut monitor = ActivityMonitor::new(true, true);
        monitor.arm();
        monitor.acquisition_did_finish();
        assert!(!monitor.is_sweep_complete());
        monitor.stimulation_did_finish();
        assert!(monitor.is_sweep_complete());
    }

    #[test]
    fn test_distinct_trigger_only_needs_acquisition() {
        let mut monitor = ActivityMonitor::new(true, false);
        monitor.arm();
        monitor.acquisition_did_finish();
        assert!(monitor.is_sweep_complete());
        assert!(monitor.activity().stimulation_active);
    }

    #[test]
    fn test_decision_table() {
        let idle = DeviceActivity::default();
        let acq_only = DeviceActivity {
            acquisition_active: true,
            stimulation_active: false,
        };
        let stim_only = DeviceActivity {
            acquisition_active: false,
            stimulation_active: true,
        };
        assert!(sweep_is_complete(false, true, idle));
        assert!(sweep_is_complete(false, false, stim_only));
        assert!(!sweep_is_complete(false, true, acq_only));
        assert!(!sweep_is_complete(true, true, stim_only));
        assert!(sweep_is_complete(true, false, stim_only));
        assert!(!sweep_is_complete(true, false, acq_only));
    }

    #[test]
    fn test_rearm_clears_completion() {
        let mut monitor = ActivityMonitor::new(false, true);
        monitor.arm();
        monitor.acquisition_did_finish();
        monitor.arm();
        assert!(!monitor.is_sweep_complete());
        assert!(monitor.activity().acquisition_active);
    }

    #[test]
    fn test_inbound_stimulation_reports() {
        let mut monitor = ActivityMonitor::new(true, true);
        monitor.arm();
        assert_eq!(
            monitor.dispatch(methods::PING, &Value::Null),
            Some(Ok(json!("pong")))
        );

        let bad = monitor.dispatch(methods::STIMULATION_DID_FAIL, &json!({}));
        assert!(matches!(bad, Some(Err(ref e)) if e.code == RpcErrorCode::BadArguments));

        monitor.dispatch(methods::STIMULATION_DID_FAIL, &json!({"message": "underrun"}));
        assert!(matches!(
            monitor.take_failure(),
            Some(SweepCtlError::StimulationFailed(ref m)) if m == "underrun"
        ));
        assert!(monitor.take_failure().is_none());

        assert!(monitor.dispatch("acquisitionDidFinish", &Value::Null).is_none());
    }
}
