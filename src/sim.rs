//! Simulated remote processes
//!
//! [`SimulatedLooper`] stands in for the acquisition process and
//! [`SimulatedRefiller`] for the stimulus-output process. Each runs on its own
//! thread, answers the controller's RPC calls, and reacts to master-trigger
//! pulses the way the real process would:
//!
//! - the looper publishes a sweep of synthetic sine-wave chunks followed by
//!   `acquisition_did_finish`, or streams chunks until the run ends when
//!   acquisition is continuous
//! - the refiller waits out its stimulus episode and then reports
//!   `stimulationDidFinish` to the controller
//!
//! Faults can be injected into the looper to exercise the controller's abort
//! paths.

use crate::config::{AcquisitionSettings, RunSettingsPayload};
use crate::error::Result;
use crate::rpc::{methods, RpcClient, RpcDelegate, RpcErrorKind, RpcResult, RpcServer};
use crate::stream::{DataPublisher, StreamMessage};
use crate::types::{Matrix, ScanChunk};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Tick of the simulation threads when nothing arrives
const TICK: Duration = Duration::from_millis(5);

/// Misbehavior to inject into the simulated looper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperFault {
    /// Leave a hole of `gap` scans after the first chunk of every sweep
    SkipScans { gap: u64 },
    /// Answer `willPerformSweep` for this ordinal with an error
    FailSweepArm { ordinal: u32 },
    /// Report an acquisition failure instead of data
    FailAcquisition,
}

/// Shape of the synthetic signal
#[derive(Debug, Clone)]
pub struct LooperOptions {
    /// Scans per published chunk
    pub chunk_scans: usize,
    /// Sine amplitude in ADC counts
    pub amplitude_counts: f64,
    /// Sine frequency in Hz
    pub frequency_hz: f64,
    pub fault: Option<LooperFault>,
}

impl Default for LooperOptions {
    fn default() -> Self {
        Self {
            chunk_scans: 100,
            amplitude_counts: 8_000.0,
            frequency_hz: 10.0,
            fault: None,
        }
    }
}

/// Acquisition-side state behind the RPC delegate
struct LooperState {
    settings: AcquisitionSettings,
    options: LooperOptions,
    armed_sweep: Option<u32>,
    streaming: bool,
    next_scan: u64,
    run_start: Instant,
}

impl LooperState {
    fn channel_count(&self) -> usize {
        self.settings.channels.len()
    }

    fn make_chunk(&self, scan_index: u64, scans: usize) -> ScanChunk {
        let channels = self.channel_count();
        let dt = 1.0 / self.settings.sample_rate;
        let omega = 2.0 * std::f64::consts::PI * self.options.frequency_hz;
        let mut data = Vec::with_capacity(scans * channels);
        for i in 0..scans {
            let t = (scan_index + i as u64) as f64 * dt;
            for ch in 0..channels {
                let phase = ch as f64 * std::f64::consts::FRAC_PI_4;
                let value = self.options.amplitude_counts * (omega * t + phase).sin();
                data.push(value.clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            }
        }
        let analog = Matrix::new(scans, channels, data).unwrap_or_else(|_| Matrix::empty(channels));
        ScanChunk::analog_only(scan_index, analog, self.run_start.elapsed().as_secs_f64())
    }

    fn publish_next(&mut self, publisher: &mut dyn DataPublisher, scans: usize) -> Result<()> {
        let chunk = self.make_chunk(self.next_scan, scans);
        self.next_scan += scans as u64;
        publisher.publish(&StreamMessage::Scans(chunk))
    }

    /// Publish what one trigger pulse produces
    fn on_pulse(&mut self, pulse: u32, publisher: &mut dyn DataPublisher) -> Result<()> {
        let Some(ordinal) = self.armed_sweep else {
            tracing::warn!("Looper: pulse {} while not armed; ignoring", pulse);
            return Ok(());
        };

        if self.options.fault == Some(LooperFault::FailAcquisition) {
            self.armed_sweep = None;
            return publisher.publish(&StreamMessage::AcquisitionDidFail {
                message: format!("simulated failure in sweep {}", ordinal),
            });
        }

        if self.settings.is_continuous {
            self.streaming = true;
            return Ok(());
        }

        let total = self.settings.scans_per_sweep();
        let chunk = self.options.chunk_scans.max(1) as u64;
        let mut first = true;
        while self.next_scan < total {
            let scans = chunk.min(total - self.next_scan) as usize;
            self.publish_next(publisher, scans)?;
            if first {
                if let Some(LooperFault::SkipScans { gap }) = self.options.fault {
                    self.next_scan += gap;
                }
                first = false;
            }
        }
        self.armed_sweep = None;
        tracing::debug!("Looper: sweep {} published {} scans", ordinal, total);
        publisher.publish(&StreamMessage::AcquisitionDidFinish)
    }

    fn end_run(&mut self) {
        self.armed_sweep = None;
        self.streaming = false;
    }
}

impl RpcDelegate for LooperState {
    fn dispatch(&mut self, method: &str, args: &Value) -> Option<RpcResult> {
        let result = match method {
            methods::WILL_PERFORM_RUN => {
                match serde_json::from_value::<RunSettingsPayload>(args.clone()) {
                    Ok(payload) => {
                        tracing::info!(
                            "Looper: armed for {} sweep(s) at {} Hz",
                            payload.sweep_count,
                            payload.acquisition.sample_rate
                        );
                        self.settings = payload.acquisition;
                        self.run_start = Instant::now();
                        self.end_run();
                        Ok(Value::Null)
                    }
                    Err(e) => Err(RpcErrorKind::bad_arguments(e.to_string())),
                }
            }
            methods::WILL_PERFORM_SWEEP => {
                let Some(ordinal) = args.get("sweep_ordinal").and_then(Value::as_u64) else {
                    return Some(Err(RpcErrorKind::bad_arguments(
                        "willPerformSweep needs 'sweep_ordinal'",
                    )));
                };
                let ordinal = ordinal as u32;
                if self.options.fault == Some(LooperFault::FailSweepArm { ordinal }) {
                    Err(RpcErrorKind::handler_failed(format!(
                        "simulated arming failure for sweep {}",
                        ordinal
                    )))
                } else {
                    self.armed_sweep = Some(ordinal);
                    self.streaming = false;
                    self.next_scan = 0;
                    Ok(Value::Null)
                }
            }
            methods::DID_COMPLETE_RUN | methods::DID_ABORT_RUN => {
                tracing::debug!("Looper: {}", method);
                self.end_run();
                Ok(Value::Null)
            }
            methods::PING => Ok(Value::String("pong".to_string())),
            _ => return None,
        };
        Some(result)
    }
}

/// Handle to a running simulated looper thread
pub struct SimulatedLooper {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedLooper {
    /// Start serving `server`, publishing on `publisher` whenever `pulses` fires
    pub fn spawn(
        settings: AcquisitionSettings,
        options: LooperOptions,
        server: RpcServer,
        mut publisher: impl DataPublisher + 'static,
        pulses: Receiver<u32>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            let mut state = LooperState {
                settings,
                options,
                armed_sweep: None,
                streaming: false,
                next_scan: 0,
                run_start: Instant::now(),
            };
            tracing::debug!("Simulated looper started");
            while flag.load(Ordering::SeqCst) {
                select! {
                    recv(server.receiver()) -> call => match call {
                        Ok(call) => call.answer(&mut state),
                        Err(_) => break,
                    },
                    recv(pulses) -> pulse => match pulse {
                        Ok(n) => {
                            if let Err(e) = state.on_pulse(n, &mut publisher) {
                                tracing::warn!("Looper: publish failed: {}", e);
                            }
                        }
                        Err(_) => break,
                    },
                    default(TICK) => {
                        if state.streaming {
                            let scans = state.options.chunk_scans.max(1);
                            if let Err(e) = state.publish_next(&mut publisher, scans) {
                                tracing::warn!("Looper: publish failed: {}", e);
                                state.streaming = false;
                            }
                        }
                    }
                }
            }
            tracing::debug!("Simulated looper stopped");
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Simulated looper thread panicked");
            }
        }
    }
}

impl Drop for SimulatedLooper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stimulation-side state behind the RPC delegate
struct RefillerState {
    armed: bool,
    episode_started: Option<Instant>,
}

impl RpcDelegate for RefillerState {
    fn dispatch(&mut self, method: &str, _args: &Value) -> Option<RpcResult> {
        match method {
            methods::WILL_PERFORM_RUN => {
                self.armed = false;
                self.episode_started = None;
            }
            methods::WILL_PERFORM_SWEEP => self.armed = true,
            methods::DID_COMPLETE_RUN | methods::DID_ABORT_RUN => {
                self.armed = false;
                self.episode_started = None;
            }
            methods::PING => return Some(Ok(Value::String("pong".to_string()))),
            _ => return None,
        }
        Some(Ok(Value::Null))
    }
}

/// Handle to a running simulated refiller
///
/// Finish reports go through a separate reporter thread so the refiller
/// keeps answering the controller while a report is in flight.
pub struct SimulatedRefiller {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl SimulatedRefiller {
    /// Serve `server`; after each pulse wait `episode`, then report to `controller`
    pub fn spawn(
        server: RpcServer,
        mut controller: impl RpcClient + 'static,
        pulses: Receiver<u32>,
        episode: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (report_tx, report_rx): (Sender<u32>, Receiver<u32>) = unbounded();

        let reporter = std::thread::spawn(move || {
            for pulse in report_rx.iter() {
                match controller.call(methods::STIMULATION_DID_FINISH, Value::Null) {
                    Ok(_) => tracing::debug!("Refiller: reported episode {} finished", pulse),
                    Err(e) => tracing::warn!("Refiller: finish report failed: {}", e),
                }
            }
        });

        let flag = Arc::clone(&running);
        let worker = std::thread::spawn(move || {
            let mut state = RefillerState {
                armed: false,
                episode_started: None,
            };
            let mut last_pulse = 0;
            while flag.load(Ordering::SeqCst) {
                select! {
                    recv(server.receiver()) -> call => match call {
                        Ok(call) => call.answer(&mut state),
                        Err(_) => break,
                    },
                    recv(pulses) -> pulse => match pulse {
                        Ok(n) if state.armed => {
                            last_pulse = n;
                            state.armed = false;
                            state.episode_started = Some(Instant::now());
                        }
                        Ok(n) => tracing::warn!("Refiller: pulse {} while not armed", n),
                        Err(_) => break,
                    },
                    default(TICK) => {}
                }
                if state.episode_started.is_some_and(|t| t.elapsed() >= episode) {
                    state.episode_started = None;
                    if report_tx.send(last_pulse).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            running,
            handles: vec![worker, reporter],
        }
    }

    /// Stop both threads and wait for them
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Simulated refiller thread panicked");
            }
        }
    }
}

impl Drop for SimulatedRefiller {
    fn drop(&mut self) {
        self.stop();
    }
}
