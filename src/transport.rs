//! Tokio runtime behind the socket transports
//!
//! The controller itself is a blocking, single-threaded loop. Socket I/O
//! for the TCP transports runs on a small tokio runtime owned by each
//! endpoint; decoded frames cross back to the blocking side over channels.

use crate::error::Result;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

/// A tokio runtime that is shut down in the background when dropped
#[derive(Debug)]
pub(crate) struct IoRuntime {
    runtime: Option<Runtime>,
}

impl IoRuntime {
    /// Runtime with one worker thread, for listeners that must make progress
    /// while nobody is blocked on them
    pub(crate) fn background(name: &str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name)
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Runtime driven only by the thread calling [`IoRuntime::block_on`]
    pub(crate) fn caller_driven() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime().block_on(future)
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime().spawn(future)
    }

    fn runtime(&self) -> &Runtime {
        // Only taken in Drop
        match self.runtime.as_ref() {
            Some(runtime) => runtime,
            None => unreachable!("runtime used after shutdown"),
        }
    }
}

impl Drop for IoRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Resolve with the blocking resolver so callers can keep passing anything
/// that implements [`std::net::ToSocketAddrs`]
pub(crate) fn resolve(addr: impl ToSocketAddrs) -> Result<Vec<SocketAddr>> {
    Ok(addr.to_socket_addrs()?.collect())
}
