//! sweepctl - Main Entry Point
//!
//! Loads a controller configuration, wires the orchestrator to its remote
//! processes and performs one run.
//!
//! ```text
//! sweepctl [CONFIG] [--simulate]
//! ```
//!
//! With `--simulate` the acquisition and stimulation processes are replaced
//! by in-process simulations. Ctrl-C stops the run at the next polling tick
//! so the usual aborted-run cleanup still happens.

use anyhow::Context;
use clap::Parser;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sweepctl::{
    config::{AnalogChannel, ControllerConfig},
    orchestrator::{Orchestrator, OrchestratorBuilder, SoftwareTrigger},
    rpc::{self, TcpRpcClient, TcpRpcServer},
    sim::{LooperOptions, SimulatedLooper, SimulatedRefiller},
    stream::{self, TcpDataSubscriber},
    subsystem::{LoggingSubsystem, MonitorSubsystem},
    types::DeviceConfiguration,
    RunOutcome, ScriptHooks,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sweepctl", version, about = "Run/sweep controller for acquisition rigs")]
struct Args {
    /// Controller configuration (TOML or JSON); defaults to the platform
    /// config directory
    config: Option<PathBuf>,

    /// Replace the remote processes with in-process simulations
    #[arg(long)]
    simulate: bool,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sweepctl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sweepctl=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Set `stop` every time `interrupt` resolves, on a runtime of its own.
///
/// The returned runtime must outlive the run.
fn stop_on<F, Fut>(interrupt: F, stop: Arc<AtomicBool>) -> anyhow::Result<tokio::runtime::Runtime>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = std::io::Result<()>> + Send,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("signals")
        .enable_all()
        .build()
        .context("starting signal runtime")?;
    runtime.spawn(async move {
        loop {
            if let Err(e) = interrupt().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                break;
            }
            tracing::warn!("Interrupt received, stopping the run");
            stop.store(true, Ordering::SeqCst);
        }
    });
    Ok(runtime)
}

/// Remote-process simulations kept alive for the length of the run
#[derive(Default)]
struct Simulation {
    looper: Option<SimulatedLooper>,
    refiller: Option<SimulatedRefiller>,
}

impl Simulation {
    fn stop(&mut self) {
        if let Some(looper) = self.looper.as_mut() {
            looper.stop();
        }
        if let Some(refiller) = self.refiller.as_mut() {
            refiller.stop();
        }
    }
}

fn simulated(config: &mut ControllerConfig) -> (OrchestratorBuilder, Simulation) {
    if config.acquisition.channels.is_empty() {
        config.acquisition.channels = vec![AnalogChannel::new("AI0"), AnalogChannel::new("AI1")];
    }
    if config.device.is_none() {
        let names: Vec<String> = config
            .acquisition
            .channels
            .iter()
            .map(|c| c.name.clone())
            .collect();
        config.device = Some(DeviceConfiguration::new("SimDev").with_analog_inputs(names));
    }

    let (looper_client, looper_server) = rpc::in_process();
    let (publisher, subscriber) = stream::channel();
    let (mut trigger, looper_pulses) = SoftwareTrigger::connected();

    let mut simulation = Simulation {
        looper: Some(SimulatedLooper::spawn(
            config.acquisition.clone(),
            LooperOptions::default(),
            looper_server,
            publisher,
            looper_pulses,
        )),
        refiller: None,
    };

    let mut builder = Orchestrator::builder(config.clone())
        .looper(looper_client)
        .data(subscriber);

    if config.stimulation.enabled {
        let (refiller_client, refiller_server) = rpc::in_process();
        let (controller_client, controller_server) = rpc::in_process();
        let episode = Duration::from_secs_f64(config.acquisition.sweep_duration / 2.0);
        simulation.refiller = Some(SimulatedRefiller::spawn(
            refiller_server,
            controller_client,
            trigger.add_listener(),
            episode,
        ));
        builder = builder.refiller(refiller_client).inbound(controller_server);
    }

    tracing::info!("Using simulated remote processes");
    (builder.trigger(trigger), simulation)
}

fn networked(config: &ControllerConfig) -> anyhow::Result<OrchestratorBuilder> {
    let endpoints = &config.endpoints;
    let looper = TcpRpcClient::connect(&endpoints.looper)
        .with_context(|| format!("connecting to acquisition process at {}", endpoints.looper))?;
    let (inbound, bound) = TcpRpcServer::bind(&endpoints.controller_bind)
        .with_context(|| format!("binding controller RPC at {}", endpoints.controller_bind))?;
    let data = TcpDataSubscriber::bind(&endpoints.data_bind)
        .with_context(|| format!("binding data channel at {}", endpoints.data_bind))?;
    tracing::info!(
        "Serving RPC on {}, data channel on {}",
        bound,
        data.local_addr()
    );

    let mut builder = Orchestrator::builder(config.clone())
        .looper(looper)
        .inbound(inbound)
        .data(data);

    if config.stimulation.enabled {
        let refiller = TcpRpcClient::connect(&endpoints.refiller).with_context(|| {
            format!("connecting to stimulation process at {}", endpoints.refiller)
        })?;
        builder = builder.refiller(refiller);
    }
    Ok(builder)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::load_default()?,
    };
    let _guard = init_tracing(config.logging.log_directory.as_deref());

    tracing::info!("Starting sweepctl");

    let (builder, mut simulation) = if args.simulate {
        simulated(&mut config)
    } else {
        (networked(&config)?, Simulation::default())
    };

    let mut builder = builder
        .subsystem(LoggingSubsystem::new(config.logging.clone()))
        .subsystem(MonitorSubsystem::new());
    if let Some(script) = &config.hooks.script {
        builder = builder.hooks(ScriptHooks::from_file(script)?);
    }

    let mut orchestrator = builder.build()?;
    let _signals = stop_on(tokio::signal::ctrl_c, orchestrator.stop_handle())?;
    let result = orchestrator.run();
    match &result {
        Ok(RunOutcome::Completed { sweeps_completed }) => {
            tracing::info!("Run completed: {} sweep(s)", sweeps_completed)
        }
        Ok(RunOutcome::Aborted {
            reason,
            sweeps_completed,
        }) => tracing::warn!(
            "Run aborted ({}) after {} sweep(s)",
            reason,
            sweeps_completed
        ),
        Ok(RunOutcome::Skipped) => tracing::warn!(
            "Run skipped: controller is {}",
            orchestrator.state()
        ),
        Err(e) => tracing::error!("Run failed: {}", e),
    }

    tracing::info!("Shutting down...");
    orchestrator.shutdown();
    simulation.stop();

    result.map(|_| ()).map_err(Into::into)
}
