//! Synchronous request/reply link between the controller and its remotes
//!
//! Every remote process (acquisition "looper", stimulation "refiller") is
//! addressed through an [`RpcClient`]. A call blocks until the remote answers
//! with either a value or an [`RpcErrorKind`]; there is no protocol-level
//! timeout.
//!
//! Inbound calls arrive on an [`RpcServer`], which is only a queue: the owner
//! drains it from its own thread with [`RpcServer::drain`] and answers each
//! [`InboundCall`] through an [`RpcDelegate`]. Method names the delegate does
//! not recognize are answered with [`RpcErrorCode::UnknownMethod`].
//!
//! # Transports
//!
//! - [`in_process`] - crossbeam channels, for tests and single-machine setups
//! - [`tcp`] - newline-delimited JSON frames over TCP, served by tokio
//!
//! # Example
//!
//! ```ignore
//! use sweepctl::rpc::{in_process, RpcClient};
//!
//! let (mut client, server) = in_process();
//! std::thread::spawn(move || loop {
//!     for call in server.drain() {
//!         call.answer(&mut my_delegate);
//!     }
//! });
//! client.call("willPerformSweep", serde_json::json!({ "sweep_ordinal": 1 }))?;
//! ```

pub mod tcp;

use crate::error::{Result, SweepCtlError};
use crate::transport::IoRuntime;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tokio::sync::oneshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub use tcp::{TcpRpcClient, TcpRpcServer};

/// Method names understood by the remote processes
pub mod methods {
    /// Arm a run; args carry the serialized run settings
    pub const WILL_PERFORM_RUN: &str = "willPerformRun";
    /// Arm a sweep; args carry the 1-based sweep ordinal
    pub const WILL_PERFORM_SWEEP: &str = "willPerformSweep";
    /// The run finished normally
    pub const DID_COMPLETE_RUN: &str = "didCompleteRun";
    /// The run was aborted; args carry the reason
    pub const DID_ABORT_RUN: &str = "didAbortRun";
    /// Stimulation finished its episode for the current sweep
    pub const STIMULATION_DID_FINISH: &str = "stimulationDidFinish";
    /// Stimulation failed; args carry a message
    pub const STIMULATION_DID_FAIL: &str = "stimulationDidFail";
    /// Liveness probe
    pub const PING: &str = "ping";
}

/// Category of a remote error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorCode {
    /// The remote has no handler for the method
    UnknownMethod,
    /// The arguments could not be understood
    BadArguments,
    /// The handler ran and failed
    HandlerFailed,
}

/// Structured error returned by a remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorKind {
    /// Error category
    pub code: RpcErrorCode,
    /// Human-readable description
    pub message: String,
}

impl RpcErrorKind {
    /// Create an error descriptor
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error for a method the remote does not implement
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            RpcErrorCode::UnknownMethod,
            format!("no handler for method '{}'", method),
        )
    }

    /// Error for arguments that could not be decoded
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadArguments, message)
    }

    /// Error raised by a handler
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::HandlerFailed, message)
    }
}

impl std::fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self.code {
            RpcErrorCode::UnknownMethod => "unknown method",
            RpcErrorCode::BadArguments => "bad arguments",
            RpcErrorCode::HandlerFailed => "handler failed",
        };
        write!(f, "{}: {}", code, self.message)
    }
}

/// Outcome of a call as seen by the handler
pub type RpcResult = std::result::Result<Value, RpcErrorKind>;

/// A call on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlates the reply with the request
    pub id: u64,
    /// Method name
    pub method: String,
    /// Opaque argument payload
    #[serde(default)]
    pub args: Value,
}

/// A reply on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request being answered
    pub id: u64,
    /// Value or error
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

/// Success or failure of a call, as serialized in [`RpcResponse`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcOutcome {
    /// The call succeeded
    Value(Value),
    /// The call failed
    Error(RpcErrorKind),
}

impl From<RpcResult> for RpcOutcome {
    fn from(result: RpcResult) -> Self {
        match result {
            Ok(value) => RpcOutcome::Value(value),
            Err(err) => RpcOutcome::Error(err),
        }
    }
}

impl RpcResponse {
    /// Convert a reply into the caller-side result
    pub fn into_result(self, method: &str) -> Result<Value> {
        match self.outcome {
            RpcOutcome::Value(value) => Ok(value),
            RpcOutcome::Error(error) => Err(SweepCtlError::Rpc {
                method: method.to_string(),
                error,
            }),
        }
    }
}

/// Client endpoint for one remote process
#[cfg_attr(test, mockall::automock)]
pub trait RpcClient: Send {
    /// Invoke `method` on the remote and block until it replies.
    ///
    /// An error reply from the remote becomes [`SweepCtlError::Rpc`]; a
    /// broken link becomes [`SweepCtlError::RpcTransport`].
    fn call(&mut self, method: &str, args: Value) -> Result<Value>;
}

/// Handler for inbound calls
pub trait RpcDelegate {
    /// Handle one call. Return `None` when the method is not recognized.
    fn dispatch(&mut self, method: &str, args: &Value) -> Option<RpcResult>;
}

/// An inbound call waiting for an answer
#[derive(Debug)]
pub struct InboundCall {
    /// The request
    pub request: RpcRequest,
    reply: oneshot::Sender<RpcResponse>,
}

impl InboundCall {
    /// Create an inbound call whose reply is delivered on `reply`
    pub fn new(request: RpcRequest, reply: oneshot::Sender<RpcResponse>) -> Self {
        Self { request, reply }
    }

    /// Dispatch to the delegate and send the reply back to the caller
    pub fn answer(self, delegate: &mut dyn RpcDelegate) {
        let outcome = delegate
            .dispatch(&self.request.method, &self.request.args)
            .unwrap_or_else(|| {
                tracing::warn!("Inbound call to unknown method '{}'", self.request.method);
                Err(RpcErrorKind::unknown_method(&self.request.method))
            });
        self.respond(outcome);
    }

    /// Send an explicit reply
    pub fn respond(self, outcome: RpcResult) {
        let response = RpcResponse {
            id: self.request.id,
            outcome: outcome.into(),
        };
        if self.reply.send(response).is_err() {
            tracing::debug!(
                "Caller of '{}' went away before the reply was sent",
                self.request.method
            );
        }
    }
}

/// Server endpoint: a queue of inbound calls
#[derive(Debug)]
pub struct RpcServer {
    calls: Receiver<InboundCall>,
    // Declared after `calls`: pending calls are dropped before the
    // connections that wait on them
    transport: Option<IoRuntime>,
}

impl RpcServer {
    /// Wrap a queue of inbound calls
    pub fn new(calls: Receiver<InboundCall>) -> Self {
        Self {
            calls,
            transport: None,
        }
    }

    /// Wrap a queue fed by connections running on `transport`
    pub(crate) fn with_transport(calls: Receiver<InboundCall>, transport: IoRuntime) -> Self {
        Self {
            calls,
            transport: Some(transport),
        }
    }

    /// Whether calls arrive from sockets rather than in-process clients
    pub fn is_networked(&self) -> bool {
        self.transport.is_some()
    }

    /// Take every call currently pending, without blocking
    pub fn drain(&self) -> Vec<InboundCall> {
        self.calls.try_iter().collect()
    }

    /// Wait up to `timeout` for the next call
    pub fn next_timeout(&self, timeout: Duration) -> Option<InboundCall> {
        match self.calls.recv_timeout(timeout) {
            Ok(call) => Some(call),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Answer every pending call with `delegate`. Returns the number answered.
    pub fn service_pending(&self, delegate: &mut dyn RpcDelegate) -> usize {
        let calls = self.drain();
        let count = calls.len();
        for call in calls {
            call.answer(delegate);
        }
        count
    }

    /// Underlying receiver, for use with `crossbeam_channel::select!`
    pub fn receiver(&self) -> &Receiver<InboundCall> {
        &self.calls
    }
}

/// In-process client: sends requests straight onto a server queue
#[derive(Debug, Clone)]
pub struct InProcessClient {
    calls: Sender<InboundCall>,
    next_id: u64,
}

impl RpcClient for InProcessClient {
    fn call(&mut self, method: &str, args: Value) -> Result<Value> {
        self.next_id += 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RpcRequest {
            id: self.next_id,
            method: method.to_string(),
            args,
        };
        self.calls
            .send(InboundCall::new(request, reply_tx))
            .map_err(|_| SweepCtlError::RpcTransport(format!("server for '{}' is gone", method)))?;

        let response = reply_rx.blocking_recv().map_err(|_| {
            SweepCtlError::RpcTransport(format!("server dropped the call to '{}'", method))
        })?;
        response.into_result(method)
    }
}

/// Create a connected in-process client/server pair
pub fn in_process() -> (InProcessClient, RpcServer) {
    let (tx, rx) = unbounded();
    (
        InProcessClient {
            calls: tx,
            next_id: 0,
        },
        RpcServer::new(rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl RpcDelegate for Echo {
        fn dispatch(&mut self, method: &str, args: &Value) -> Option<RpcResult> {
            match method {
                "echo" => Some(Ok(args.clone())),
                "fail" => Some(Err(RpcErrorKind::handler_failed("asked to fail"))),
                _ => None,
            }
        }
    }

    fn serve_once(server: RpcServer) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            if let Some(call) = server.next_timeout(Duration::from_secs(5)) {
                call.answer(&mut Echo);
            }
        })
    }

    #[test]
    fn test_in_process_call_returns_value() {
        let (mut client, server) = in_process();
        let handle = serve_once(server);
        let value = client.call("echo", json!({"x": 1})).unwrap();
        assert_eq!(value, json!({"x": 1}));
        handle.join().unwrap();
    }

    #[test]
    fn test_error_reply_becomes_rpc_error() {
        let (mut client, server) = in_process();
        let handle = serve_once(server);
        let err = client.call("fail", Value::Null).unwrap_err();
        match err {
            SweepCtlError::Rpc { method, error } => {
                assert_eq!(method, "fail");
                assert_eq!(error.code, RpcErrorCode::HandlerFailed);
            }
            other => panic!("unexpected error {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_unknown_method_is_error_reply() {
        let (mut client, server) = in_process();
        let handle = serve_once(server);
        let err = client.call("nope", Value::Null).unwrap_err();
        assert!(matches!(
            err,
            SweepCtlError::Rpc {
                error: RpcErrorKind {
                    code: RpcErrorCode::UnknownMethod,
                    ..
                },
                ..
            }
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_server_is_transport_error() {
        let (mut client, server) = in_process();
        drop(server);
        let err = client.call("echo", Value::Null).unwrap_err();
        assert!(matches!(err, SweepCtlError::RpcTransport(_)));
    }

    #[test]
    fn test_response_wire_format() {
        let ok = RpcResponse {
            id: 7,
            outcome: RpcOutcome::Value(json!(null)),
        };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"id": 7, "value": null}));

        let err = RpcResponse {
            id: 8,
            outcome: RpcOutcome::Error(RpcErrorKind::unknown_method("x")),
        };
        let encoded = serde_json::to_string(&err).unwrap();
        let decoded: RpcResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, err);
    }
}
