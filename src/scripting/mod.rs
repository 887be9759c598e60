//! Rhai user hooks
//!
//! A hook script is an ordinary Rhai file. Its top level runs once when it
//! is loaded; after that the controller calls any of the following functions
//! the script defines (a function with a different number of parameters is
//! not treated as a hook):
//!
//! - `run_will_start()`
//! - `sweep_will_start(ordinal)`
//! - `data_available(means, t)` - per-channel means of the chunk's scaled
//!   data, and its run-relative timestamp
//! - `sweep_did_complete(ordinal)`
//! - `sweep_did_abort(ordinal, reason)` - reason is `"user"` or `"problem"`
//! - `run_did_complete(sweeps_completed)`
//! - `run_did_abort(reason)`
//!
//! ## Host functions
//!
//! - `log(message)` - write to the controller log
//! - `sweep_ordinal()` - ordinal of the sweep in progress
//! - `sweeps_completed()` - sweeps completed so far in this run
//! - `chunks_in_sweep()` - chunks delivered so far in this sweep
//!
//! Hook failures (including hitting the engine's operation limit) are logged
//! and never affect the run.
//!
//! ## Example
//!
//! ```rhai
//! fn data_available(means, t) {
//!     if means[0] > 5.0 {
//!         log(`AI0 above threshold at ${t} s`);
//!     }
//! }
//!
//! fn run_did_complete(n) {
//!     log(`finished ${n} sweeps`);
//! }
//! ```

mod engine;

pub use engine::{HookContext, ScriptHooks, SharedHookContext};
