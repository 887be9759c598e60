//! End-to-end runs over loopback TCP
//!
//! The simulated remotes sit behind real sockets: RPC in both directions
//! and the data channel as newline-delimited JSON.

mod common;

use common::builders::ConfigBuilder;
use serde_json::Value;
use std::time::Duration;
use sweepctl::orchestrator::{Orchestrator, SoftwareTrigger};
use sweepctl::rpc::{methods, RpcClient, TcpRpcClient, TcpRpcServer};
use sweepctl::sim::{LooperOptions, SimulatedLooper, SimulatedRefiller};
use sweepctl::stream::{TcpDataPublisher, TcpDataSubscriber};
use sweepctl::subsystem::{Callback, Journal, RecordingSubsystem};
use sweepctl::types::ApplicationState;
use sweepctl::RunOutcome;

#[test]
fn test_run_over_loopback() {
    let config = ConfigBuilder::new()
        .sweeps(2)
        .sweep_duration(0.25)
        .with_stimulation()
        .build();

    // Acquisition process
    let (looper_server, looper_addr) = TcpRpcServer::bind("127.0.0.1:0").unwrap();
    let subscriber = TcpDataSubscriber::bind("127.0.0.1:0").unwrap();
    let publisher = TcpDataPublisher::connect(subscriber.local_addr()).unwrap();
    let (mut trigger, looper_pulses) = SoftwareTrigger::connected();
    let mut looper = SimulatedLooper::spawn(
        config.acquisition.clone(),
        LooperOptions::default(),
        looper_server,
        publisher,
        looper_pulses,
    );

    // Stimulation process, reporting back to the controller's RPC server
    let (inbound, inbound_addr) = TcpRpcServer::bind("127.0.0.1:0").unwrap();
    let (refiller_server, refiller_addr) = TcpRpcServer::bind("127.0.0.1:0").unwrap();
    let mut refiller = SimulatedRefiller::spawn(
        refiller_server,
        TcpRpcClient::connect(inbound_addr).unwrap(),
        trigger.add_listener(),
        Duration::from_millis(30),
    );

    let journal = Journal::new();
    let mut orchestrator = Orchestrator::builder(config)
        .looper(TcpRpcClient::connect(looper_addr).unwrap())
        .refiller(TcpRpcClient::connect(refiller_addr).unwrap())
        .inbound(inbound)
        .data(subscriber)
        .trigger(trigger)
        .subsystem(RecordingSubsystem::new("A", journal.clone()))
        .build()
        .unwrap();

    let outcome = orchestrator.run().unwrap();

    assert_eq!(outcome, RunOutcome::Completed { sweeps_completed: 2 });
    assert_eq!(orchestrator.samples_acquired(), 500);
    assert_eq!(orchestrator.state(), ApplicationState::Idle);
    assert_eq!(journal.count(Callback::DidCompleteSweep), 2);
    assert_eq!(journal.chunks().len(), 6);

    orchestrator.shutdown();
    looper.stop();
    refiller.stop();
}

#[test]
fn test_remote_answers_ping_and_rejects_unknown_methods() {
    let config = ConfigBuilder::new().build();
    let (server, addr) = TcpRpcServer::bind("127.0.0.1:0").unwrap();
    let subscriber = TcpDataSubscriber::bind("127.0.0.1:0").unwrap();
    let publisher = TcpDataPublisher::connect(subscriber.local_addr()).unwrap();
    let (_trigger, pulses) = SoftwareTrigger::connected();
    let mut looper = SimulatedLooper::spawn(
        config.acquisition.clone(),
        LooperOptions::default(),
        server,
        publisher,
        pulses,
    );

    let mut client = TcpRpcClient::connect(addr).unwrap();
    assert_eq!(
        client.call(methods::PING, Value::Null).unwrap(),
        Value::String("pong".to_string())
    );
    assert!(client.call("noSuchMethod", Value::Null).is_err());
    assert!(client
        .call(methods::WILL_PERFORM_RUN, serde_json::json!({ "bogus": 1 }))
        .is_err());

    looper.stop();
}
