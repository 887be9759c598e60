//! Run/sweep orchestrator
//!
//! The [`Orchestrator`] owns everything a run touches: the state machine,
//! the subsystem registry, the RPC clients for the acquisition ("looper")
//! and stimulation ("refiller") processes, the inbound RPC server, the data
//! channel subscriber and the master trigger. It runs on a single thread;
//! [`Orchestrator::run`] blocks until the run has completed or aborted and
//! every cleanup step has executed.
//!
//! # Control flow
//!
//! ```text
//! run ──► handshake ──► will_perform_run ──► Running ──► sweep 1..=N ──► cleanup ──► Idle
//!                                                            │
//!                              will_perform_sweep ──► pulse ──► poll loop
//!                                                                 │
//!                                        drain data ──► continuity ──► scaling ──► subsystems
//! ```
//!
//! The polling loop is the only suspension point. Each tick drains every
//! pending data-channel message, answers pending inbound calls, then pumps
//! the host event layer; between ticks it sleeps for at most 10 ms.
//!
//! Cancellation goes through [`Orchestrator::stop_handle`]: the flag is
//! checked once per loop iteration, after the completion flag.

pub mod handshake;
pub mod hooks;
pub mod state;
pub mod sweep;
pub mod trigger;

pub use handshake::{ArmRequest, ImagingHandshake};
pub use hooks::{EventPump, NoHooks, UserHooks};
pub use state::{ControllerEvent, EventBus, StateMachine};
pub use sweep::{sweep_is_complete, ActivityMonitor, DeviceActivity, Sweep, SweepReport};
pub use trigger::{MasterTrigger, SoftwareTrigger};

use crate::config::ControllerConfig;
use crate::error::{Result, SweepCtlError};
use crate::rpc::{methods, RpcClient, RpcServer};
use crate::stream::{ContinuityValidator, DataSubscriber, ScalingStage, StreamMessage};
use crate::subsystem::{AnySubsystem, RunContext, SubsystemRegistry, SweepContext, SweepData};
use crate::types::{AbortReason, ApplicationState, DeviceConfiguration, ScanChunk};
use crossbeam_channel::Receiver;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest sleep between polling-loop iterations
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// How a call to [`Orchestrator::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The controller was not `Idle`; nothing happened
    Skipped,
    /// Every sweep completed
    Completed { sweeps_completed: u32 },
    /// The run ended early without an error to report
    Aborted {
        reason: AbortReason,
        sweeps_completed: u32,
    },
}

enum SweepExit {
    Completed,
    StoppedByUser,
}

/// Assembles an [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: ControllerConfig,
    registry: SubsystemRegistry,
    looper: Option<Box<dyn RpcClient>>,
    refiller: Option<Box<dyn RpcClient>>,
    inbound: Option<RpcServer>,
    data: Option<Box<dyn DataSubscriber>>,
    trigger: Option<Box<dyn MasterTrigger>>,
    hooks: Option<Box<dyn UserHooks>>,
    pump: Option<Box<dyn EventPump>>,
    bus: EventBus,
}

impl OrchestratorBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            registry: SubsystemRegistry::new(),
            looper: None,
            refiller: None,
            inbound: None,
            data: None,
            trigger: None,
            hooks: None,
            pump: None,
            bus: EventBus::new(),
        }
    }

    /// RPC client of the acquisition process (required)
    pub fn looper(mut self, client: impl RpcClient + 'static) -> Self {
        self.looper = Some(Box::new(client));
        self
    }

    /// RPC client of the stimulation process
    pub fn refiller(mut self, client: impl RpcClient + 'static) -> Self {
        self.refiller = Some(Box::new(client));
        self
    }

    /// Queue of calls made to the controller
    pub fn inbound(mut self, server: RpcServer) -> Self {
        self.inbound = Some(server);
        self
    }

    /// Data channel subscriber (required)
    pub fn data(mut self, subscriber: impl DataSubscriber + 'static) -> Self {
        self.data = Some(Box::new(subscriber));
        self
    }

    /// Master trigger; defaults to a detached [`SoftwareTrigger`]
    pub fn trigger(mut self, trigger: impl MasterTrigger + 'static) -> Self {
        self.trigger = Some(Box::new(trigger));
        self
    }

    pub fn hooks(mut self, hooks: impl UserHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn event_pump(mut self, pump: impl EventPump + 'static) -> Self {
        self.pump = Some(Box::new(pump));
        self
    }

    /// Append a subsystem; registration order is fan-out order
    pub fn subsystem(mut self, subsystem: impl Into<AnySubsystem>) -> Self {
        self.registry.register(subsystem);
        self
    }

    /// Observe every event, including the construction transitions
    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        self.bus.subscribe()
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let looper = self.looper.ok_or_else(|| {
            SweepCtlError::Config("no RPC client for the acquisition process".to_string())
        })?;
        let data = self
            .data
            .ok_or_else(|| SweepCtlError::Config("no data channel subscriber".to_string()))?;
        if self.config.stimulation.enabled {
            if self.refiller.is_none() {
                return Err(SweepCtlError::Config(
                    "stimulation is enabled but there is no RPC client for the stimulation process"
                        .to_string(),
                ));
            }
            if self.inbound.is_none() {
                return Err(SweepCtlError::Config(
                    "stimulation is enabled but there is no inbound RPC server for its reports"
                        .to_string(),
                ));
            }
        }

        let shares_trigger =
            self.config.stimulation.trigger_source == self.config.acquisition.trigger_source;
        let handshake = self
            .config
            .imaging
            .enabled
            .then(|| ImagingHandshake::from_settings(&self.config.imaging));

        let mut orchestrator = Orchestrator {
            state: StateMachine::with_bus(self.bus),
            registry: self.registry,
            looper,
            refiller: self.refiller,
            inbound: self.inbound,
            data,
            trigger: self
                .trigger
                .unwrap_or_else(|| Box::new(SoftwareTrigger::detached())),
            hooks: self.hooks.unwrap_or_else(|| Box::new(NoHooks)),
            pump: self.pump,
            handshake,
            monitor: ActivityMonitor::new(self.config.stimulation.enabled, shares_trigger),
            continuity: ContinuityValidator::new(),
            scaling: ScalingStage::from_settings(&self.config.acquisition),
            stop_requested: Arc::new(AtomicBool::new(false)),
            readiness: 1,
            completed_sweeps: 0,
            run_clock: Instant::now(),
            samples_acquired: 0,
            min_polling_period: self.config.min_polling_period(),
            released: false,
            config: self.config,
        };

        orchestrator.state.request(ApplicationState::NoMdf);
        if orchestrator.config.device.is_some() {
            orchestrator.state.request(ApplicationState::Idle);
        }
        tracing::info!(
            "Orchestrator ready with subsystems {:?}",
            orchestrator.registry.names()
        );
        Ok(orchestrator)
    }
}

/// Drives runs and sweeps
pub struct Orchestrator {
    config: ControllerConfig,
    state: StateMachine,
    registry: SubsystemRegistry,
    looper: Box<dyn RpcClient>,
    refiller: Option<Box<dyn RpcClient>>,
    inbound: Option<RpcServer>,
    data: Box<dyn DataSubscriber>,
    trigger: Box<dyn MasterTrigger>,
    hooks: Box<dyn UserHooks>,
    pump: Option<Box<dyn EventPump>>,
    handshake: Option<ImagingHandshake>,
    monitor: ActivityMonitor,
    continuity: ContinuityValidator,
    scaling: ScalingStage,
    stop_requested: Arc<AtomicBool>,
    readiness: i32,
    completed_sweeps: u32,
    run_clock: Instant,
    samples_acquired: u64,
    min_polling_period: f64,
    released: bool,
}

impl Orchestrator {
    pub fn builder(config: ControllerConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> ApplicationState {
        self.state.state()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Whether the controller is not busy with run setup
    pub fn is_ready(&self) -> bool {
        self.readiness > 0
    }

    /// Sweeps completed in the current or last run
    pub fn completed_sweeps(&self) -> u32 {
        self.completed_sweeps
    }

    /// Scans accepted since the current or last run started
    pub fn samples_acquired(&self) -> u64 {
        self.samples_acquired
    }

    /// Seconds; see [`ControllerConfig::min_polling_period`]
    pub fn min_polling_period(&self) -> f64 {
        self.min_polling_period
    }

    pub fn subsystem_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Observe events published from now on
    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        self.state.bus_mut().subscribe()
    }

    /// Flag that stops the current run at the next polling tick.
    ///
    /// Safe to set from any thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    // ==================== State changes outside runs ====================

    /// Supply or replace the device configuration.
    ///
    /// Leaves `NoMdf` for `Idle`. Refused while running or test pulsing.
    pub fn set_device_configuration(&mut self, device: DeviceConfiguration) -> Result<()> {
        let state = self.state.state();
        if !matches!(state, ApplicationState::NoMdf | ApplicationState::Idle) {
            return Err(SweepCtlError::Config(format!(
                "cannot change the device configuration while {}",
                state
            )));
        }
        let mut candidate = self.config.clone();
        candidate.device = Some(device);
        candidate.validate()?;
        self.config = candidate;

        if state == ApplicationState::NoMdf {
            self.state.request(ApplicationState::Idle);
        }
        Ok(())
    }

    pub fn start_test_pulsing(&mut self) -> bool {
        self.state.request(ApplicationState::TestPulsing)
    }

    pub fn stop_test_pulsing(&mut self) -> bool {
        self.state.request(ApplicationState::Idle)
    }

    /// Answer inbound calls while no sweep is running. Returns the number answered.
    pub fn service_inbound(&mut self) -> usize {
        match &self.inbound {
            Some(server) => server.service_pending(&mut self.monitor),
            None => 0,
        }
    }

    // ==================== Run ====================

    /// Perform one run.
    ///
    /// Returns `Ok(RunOutcome::Skipped)` unless the controller is `Idle`.
    /// Any error is returned only after the run has been cleaned up, so the
    /// controller is back in `Idle` and ready whenever this returns.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let state = self.state.state();
        if state != ApplicationState::Idle {
            tracing::warn!("Run requested while {}; ignoring", state);
            return Ok(RunOutcome::Skipped);
        }

        self.change_readiness(-1);
        self.stop_requested.store(false, Ordering::SeqCst);
        let sweeps = self.config.sweeps_per_run();
        tracing::info!(
            "Starting run: {} sweep(s){}",
            sweeps,
            if self.config.acquisition.is_continuous {
                " (continuous)"
            } else {
                ""
            }
        );

        if let Err(e) = self.arm_imaging(sweeps) {
            return Err(self.abort_before_run(e));
        }

        self.completed_sweeps = 0;
        self.hooks.run_will_start();

        if let Err(e) = self.prepare_run(sweeps) {
            return Err(self.abort_setup(e));
        }

        self.state.request(ApplicationState::Running);
        self.run_clock = Instant::now();
        self.samples_acquired = 0;
        self.min_polling_period = self.config.min_polling_period();
        self.change_readiness(1);

        let mut report = SweepReport::completed();
        for ordinal in 1..=sweeps {
            report = self.perform_sweep(ordinal);
            if !report.did_complete {
                break;
            }
        }

        if report.did_complete {
            if let Err(e) = self.clean_up_after_completed_run() {
                tracing::error!("Run completion failed: {}", e);
                self.clean_up_after_aborted_run(AbortReason::Problem);
                return Err(e);
            }
            return Ok(RunOutcome::Completed {
                sweeps_completed: self.completed_sweeps,
            });
        }

        let reason = if report.did_user_stop {
            AbortReason::User
        } else {
            AbortReason::Problem
        };
        self.clean_up_after_aborted_run(reason);
        match report.error {
            Some(e) => Err(e),
            None => Ok(RunOutcome::Aborted {
                reason,
                sweeps_completed: self.completed_sweeps,
            }),
        }
    }

    fn change_readiness(&mut self, delta: i32) {
        self.readiness += delta;
        tracing::trace!("Readiness now {}", self.readiness);
        let is_ready = self.is_ready();
        self.state
            .bus_mut()
            .publish(ControllerEvent::ReadinessDidChange { is_ready });
    }

    fn arm_imaging(&mut self, sweeps: u32) -> Result<()> {
        let Some(handshake) = &self.handshake else {
            return Ok(());
        };
        handshake.arm(&ArmRequest::for_run(&self.config.logging, sweeps))
    }

    fn prepare_run(&mut self, sweeps: u32) -> Result<()> {
        self.registry.will_perform_run(&RunContext {
            config: &self.config,
            sweeps_per_run: sweeps,
        })?;

        let payload = serde_json::to_value(self.config.run_settings_payload())?;
        self.looper.call(methods::WILL_PERFORM_RUN, payload.clone())?;
        if self.config.stimulation.enabled {
            if let Some(refiller) = self.refiller.as_mut() {
                refiller.call(methods::WILL_PERFORM_RUN, payload)?;
            }
        }
        Ok(())
    }

    /// Abort before subsystems or remotes have heard of the run
    fn abort_before_run(&mut self, error: SweepCtlError) -> SweepCtlError {
        tracing::error!("Run could not start: {}", error);
        self.state.request(ApplicationState::Idle);
        self.state.bus_mut().publish(ControllerEvent::RunDidAbort {
            reason: AbortReason::Problem,
        });
        self.change_readiness(1);
        error
    }

    /// Abort before any sweep has started
    fn abort_setup(&mut self, error: SweepCtlError) -> SweepCtlError {
        tracing::error!("Run setup failed: {}", error);
        self.clean_up_after_aborted_run(AbortReason::Problem);
        self.change_readiness(1);
        error
    }

    fn clean_up_after_completed_run(&mut self) -> Result<()> {
        self.registry.did_complete_run()?;
        self.notify_remotes(methods::DID_COMPLETE_RUN, Value::Null);
        self.hooks.run_did_complete(self.completed_sweeps);
        self.state.request(ApplicationState::Idle);
        self.state.bus_mut().publish(ControllerEvent::RunDidComplete {
            sweeps_completed: self.completed_sweeps,
        });
        tracing::info!("Run complete: {} sweep(s)", self.completed_sweeps);
        Ok(())
    }

    fn clean_up_after_aborted_run(&mut self, reason: AbortReason) {
        let failures = self.registry.did_abort_run(reason);
        if failures > 0 {
            tracing::warn!("{} subsystem(s) failed while aborting the run", failures);
        }
        self.notify_remotes(methods::DID_ABORT_RUN, json!({ "reason": reason }));
        self.hooks.run_did_abort(reason);
        self.state.request(ApplicationState::Idle);
        self.state
            .bus_mut()
            .publish(ControllerEvent::RunDidAbort { reason });
        tracing::info!(
            "Run aborted ({}) after {} sweep(s)",
            reason,
            self.completed_sweeps
        );
    }

    /// End-of-run notifications; failures are only logged
    fn notify_remotes(&mut self, method: &str, args: Value) {
        if let Err(e) = self.looper.call(method, args.clone()) {
            tracing::warn!("Acquisition process did not take '{}': {}", method, e);
        }
        if self.config.stimulation.enabled {
            if let Some(refiller) = self.refiller.as_mut() {
                if let Err(e) = refiller.call(method, args) {
                    tracing::warn!("Stimulation process did not take '{}': {}", method, e);
                }
            }
        }
    }

    // ==================== Sweep ====================

    fn perform_sweep(&mut self, ordinal: u32) -> SweepReport {
        match self.execute_sweep(ordinal) {
            Ok(SweepExit::Completed) => self.finish_sweep(ordinal),
            Ok(SweepExit::StoppedByUser) => {
                tracing::info!("Sweep {} stopped by user", ordinal);
                self.clean_up_after_aborted_sweep(ordinal, AbortReason::User);
                SweepReport::stopped_by_user()
            }
            Err(e) => {
                tracing::error!("Sweep {} failed: {}", ordinal, e);
                self.clean_up_after_aborted_sweep(ordinal, AbortReason::Problem);
                SweepReport::failed(e)
            }
        }
    }

    fn finish_sweep(&mut self, ordinal: u32) -> SweepReport {
        match self.clean_up_after_completed_sweep(ordinal) {
            Ok(()) => SweepReport::completed(),
            Err(e) => {
                tracing::error!("Sweep {} completion failed: {}", ordinal, e);
                self.clean_up_after_aborted_sweep(ordinal, AbortReason::Problem);
                SweepReport::failed(e)
            }
        }
    }

    fn execute_sweep(&mut self, ordinal: u32) -> Result<SweepExit> {
        let mut sweep = Sweep::start(ordinal, self.run_clock.elapsed().as_secs_f64());
        self.continuity.reset();
        self.discard_stale_messages()?;

        self.hooks.sweep_will_start(ordinal);
        self.registry.will_perform_sweep(&SweepContext { ordinal })?;
        self.monitor.arm();

        let args = json!({ "sweep_ordinal": ordinal });
        self.looper.call(methods::WILL_PERFORM_SWEEP, args.clone())?;
        if self.config.stimulation.enabled {
            if let Some(refiller) = self.refiller.as_mut() {
                refiller.call(methods::WILL_PERFORM_SWEEP, args)?;
            }
        }

        self.trigger.pulse()?;
        tracing::debug!("Sweep {} started at {:.3} s", ordinal, sweep.started_at);
        self.poll_until_done(&mut sweep)
    }

    fn discard_stale_messages(&mut self) -> Result<()> {
        let stale = self.data.drain()?;
        if !stale.is_empty() {
            tracing::debug!("Discarded {} stale data message(s)", stale.len());
        }
        self.service_inbound();
        Ok(())
    }

    fn poll_until_done(&mut self, sweep: &mut Sweep) -> Result<SweepExit> {
        let period = Duration::from_secs_f64(self.config.polling_period());
        loop {
            if sweep.is_sweep_complete {
                return Ok(SweepExit::Completed);
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                sweep.was_stopped_by_user = true;
                return Ok(SweepExit::StoppedByUser);
            }

            let since_last = sweep.last_poll.elapsed();
            if since_last >= period {
                sweep.last_poll = Instant::now();
                self.tick(sweep)?;
            } else {
                std::thread::sleep((period - since_last).min(IDLE_SLEEP));
            }
        }
    }

    /// One polling tick: drain data, answer inbound calls, pump host events
    fn tick(&mut self, sweep: &mut Sweep) -> Result<()> {
        for message in self.data.drain()? {
            match message {
                StreamMessage::Scans(chunk) => self.accept_chunk(sweep, chunk)?,
                StreamMessage::AcquisitionDidFinish => self.monitor.acquisition_did_finish(),
                StreamMessage::AcquisitionDidFail { message } => {
                    tracing::error!("Acquisition reported failure: {}", message);
                    self.monitor.acquisition_did_fail(message);
                    break;
                }
            }
        }

        self.service_inbound();
        if let Some(pump) = self.pump.as_mut() {
            pump.pump();
        }

        if let Some(failure) = self.monitor.take_failure() {
            return Err(failure);
        }
        sweep.is_sweep_complete = self.monitor.is_sweep_complete();
        Ok(())
    }

    fn accept_chunk(&mut self, sweep: &mut Sweep, chunk: ScanChunk) -> Result<()> {
        chunk.validate()?;
        let count = chunk.scan_count();
        self.continuity.accept(chunk.scan_index, count)?;
        let scaled = self.scaling.process(&chunk.analog)?;

        sweep.total_scans += count;
        self.samples_acquired += count;
        tracing::trace!(
            "Sweep {}: scans {}..{}",
            sweep.ordinal,
            chunk.scan_index,
            chunk.scan_index + count
        );

        let data = SweepData {
            is_finite_sweep: !self.config.acquisition.is_continuous,
            elapsed_in_sweep: sweep.elapsed(),
            scan_index: chunk.scan_index,
            scaled_analog: &scaled.scaled,
            raw_analog: &scaled.raw,
            raw_digital: &chunk.digital,
            time_since_run_start: chunk.time_since_run_start,
        };
        self.registry.data_is_available(&data)?;
        self.hooks.data_available(&data);
        Ok(())
    }

    fn clean_up_after_completed_sweep(&mut self, ordinal: u32) -> Result<()> {
        self.registry.did_complete_sweep()?;
        self.completed_sweeps += 1;
        self.state.bus_mut().publish(ControllerEvent::SweepDidComplete {
            ordinal,
            sweeps_completed: self.completed_sweeps,
        });
        self.hooks.sweep_did_complete(ordinal);
        tracing::info!("Sweep {} complete", ordinal);
        Ok(())
    }

    fn clean_up_after_aborted_sweep(&mut self, ordinal: u32, reason: AbortReason) {
        let failures = self.registry.did_abort_sweep(reason);
        if failures > 0 {
            tracing::warn!("{} subsystem(s) failed while aborting sweep {}", failures, ordinal);
        }
        self.state
            .bus_mut()
            .publish(ControllerEvent::SweepDidAbort { ordinal, reason });
        self.hooks.sweep_did_abort(ordinal, reason);
    }

    // ==================== Teardown ====================

    /// Release every subsystem's hardware, last registered first
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::info!("Releasing hardware resources");
        self.registry.release_hardware_resources();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.release();
    }
}
