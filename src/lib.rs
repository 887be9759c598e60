//! # sweepctl: run/sweep controller for multi-process acquisition rigs
//!
//! A rig is split across three processes: this controller, an acquisition
//! process (the "looper") and a stimulus-output process (the "refiller").
//! The controller drives the run/sweep state machine, commands the remotes
//! over a synchronous RPC link, and consumes acquired scans from a one-way
//! data channel, fanning every accepted chunk out to an ordered set of
//! lifecycle participants.
//!
//! ## Architecture
//!
//! - **Orchestrator**: state machine, `run`/sweep algorithms, polling loop
//! - **RPC**: request/reply to the remotes plus a queue of inbound calls
//! - **Stream**: data channel, continuity validation and scaling
//! - **Subsystems**: ordered lifecycle participants (data files, statistics)
//! - **Scripting**: Rhai user hooks
//! - **Communication**: crossbeam channels between the tokio socket tasks
//!   and the orchestrator thread
//!
//! ## Configuration
//!
//! The controller configuration is read from TOML or JSON; without an
//! explicit path it comes from the platform config directory under
//! `sweepctl/sweepctl.toml`.
//!
//! ## Example
//!
//! ```ignore
//! use sweepctl::{
//!     config::ControllerConfig,
//!     orchestrator::Orchestrator,
//!     rpc::TcpRpcClient,
//!     stream::TcpDataSubscriber,
//!     subsystem::MonitorSubsystem,
//! };
//!
//! let config = ControllerConfig::load("rig.toml")?;
//! let mut orchestrator = Orchestrator::builder(config.clone())
//!     .looper(TcpRpcClient::connect(&config.endpoints.looper)?)
//!     .data(TcpDataSubscriber::bind(&config.endpoints.data_bind)?)
//!     .subsystem(MonitorSubsystem::new())
//!     .build()?;
//!
//! let outcome = orchestrator.run()?;
//! println!("{:?}", outcome);
//! orchestrator.shutdown();
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod rpc;
pub mod scripting;
pub mod sim;
pub mod stream;
pub mod subsystem;
mod transport;
pub mod types;

// Re-export commonly used types
pub use config::ControllerConfig;
pub use error::{Result, SweepCtlError};
pub use orchestrator::{ControllerEvent, Orchestrator, OrchestratorBuilder, RunOutcome};
pub use scripting::ScriptHooks;
pub use types::{AbortReason, ApplicationState, Matrix, ScanChunk};
