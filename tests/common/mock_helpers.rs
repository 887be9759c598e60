//! Simulated rigs for driving the orchestrator end to end

use std::time::Duration;
use sweepctl::config::ControllerConfig;
use sweepctl::orchestrator::{Orchestrator, OrchestratorBuilder, SoftwareTrigger};
use sweepctl::rpc;
use sweepctl::sim::{LooperOptions, SimulatedLooper, SimulatedRefiller};
use sweepctl::stream;

/// Remote-process simulations backing one orchestrator
pub struct SimRig {
    pub looper: SimulatedLooper,
    pub refiller: Option<SimulatedRefiller>,
}

impl SimRig {
    pub fn stop(&mut self) {
        self.looper.stop();
        if let Some(refiller) = self.refiller.as_mut() {
            refiller.stop();
        }
    }
}

/// Wire an orchestrator builder to simulated remotes over in-process channels.
///
/// A refiller is spawned when stimulation is enabled; it reports each
/// episode as finished after `episode`.
pub fn simulated_rig(
    config: &ControllerConfig,
    options: LooperOptions,
    episode: Duration,
) -> (OrchestratorBuilder, SimRig) {
    let (looper_client, looper_server) = rpc::in_process();
    let (publisher, subscriber) = stream::channel();
    let (mut trigger, looper_pulses) = SoftwareTrigger::connected();

    let looper = SimulatedLooper::spawn(
        config.acquisition.clone(),
        options,
        looper_server,
        publisher,
        looper_pulses,
    );

    let mut builder = Orchestrator::builder(config.clone())
        .looper(looper_client)
        .data(subscriber);

    let refiller = if config.stimulation.enabled {
        let (refiller_client, refiller_server) = rpc::in_process();
        let (controller_client, controller_server) = rpc::in_process();
        let refiller = SimulatedRefiller::spawn(
            refiller_server,
            controller_client,
            trigger.add_listener(),
            episode,
        );
        builder = builder.refiller(refiller_client).inbound(controller_server);
        Some(refiller)
    } else {
        None
    };

    (builder.trigger(trigger), SimRig { looper, refiller })
}

/// [`simulated_rig`] with default looper behavior and a short episode
pub fn default_rig(config: &ControllerConfig) -> (OrchestratorBuilder, SimRig) {
    simulated_rig(config, LooperOptions::default(), Duration::from_millis(20))
}
