//! RPC over TCP
//!
//! Frames are single-line JSON documents terminated by `\n`: the client
//! writes an [`RpcRequest`] and waits for the matching [`RpcResponse`].
//! The server accepts connections on a tokio runtime and spawns one task
//! per connection; tasks only forward [`InboundCall`]s onto the queue
//! behind the returned [`RpcServer`] and write back whatever reply the
//! owner sends. The client drives its own single-threaded runtime from
//! the calling thread, so [`RpcClient::call`] stays blocking.

use super::{InboundCall, RpcClient, RpcRequest, RpcResponse, RpcServer};
use crate::error::{Result, SweepCtlError};
use crate::transport::{resolve, IoRuntime};
use crossbeam_channel::{unbounded, Sender};
use serde_json::Value;
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Blocking RPC client over one TCP connection
pub struct TcpRpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    next_id: u64,
    // Last field: the halves above are deregistered before the runtime goes
    io: IoRuntime,
}

impl TcpRpcClient {
    /// Connect to a remote RPC server
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let addrs = resolve(addr)?;
        let io = IoRuntime::caller_driven()?;
        let stream = io
            .block_on(TcpStream::connect(&addrs[..]))
            .map_err(|e| SweepCtlError::RpcTransport(format!("connect failed: {}", e)))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read, writer) = stream.into_split();
        tracing::info!("RPC client connected to {}", peer);
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
            peer,
            next_id: 0,
            io,
        })
    }

    /// Address of the remote end
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl RpcClient for TcpRpcClient {
    fn call(&mut self, method: &str, args: Value) -> Result<Value> {
        self.next_id += 1;
        let request = RpcRequest {
            id: self.next_id,
            method: method.to_string(),
            args,
        };

        let mut frame = serde_json::to_vec(&request)?;
        frame.push(b'\n');

        let (lines, writer) = (&mut self.lines, &mut self.writer);
        let line = self.io.block_on(async {
            writer.write_all(&frame).await.map_err(|e| {
                SweepCtlError::RpcTransport(format!("send '{}' failed: {}", method, e))
            })?;
            let line = lines.next_line().await.map_err(|e| {
                SweepCtlError::RpcTransport(format!("reply to '{}' failed: {}", method, e))
            })?;
            Ok::<_, SweepCtlError>(line)
        })?;
        let line = line.ok_or_else(|| {
            SweepCtlError::RpcTransport(format!(
                "{} closed the connection during '{}'",
                self.peer, method
            ))
        })?;

        let response: RpcResponse = serde_json::from_str(line.trim_end())
            .map_err(|e| SweepCtlError::RpcTransport(format!("malformed reply: {}", e)))?;
        if response.id != request.id {
            return Err(SweepCtlError::RpcTransport(format!(
                "reply id {} does not match request id {}",
                response.id, request.id
            )));
        }
        response.into_result(method)
    }
}

/// TCP front end for an [`RpcServer`]
pub struct TcpRpcServer;

impl TcpRpcServer {
    /// Bind a listener and start accepting connections.
    ///
    /// Returns the queue of inbound calls and the bound address (useful
    /// when binding port 0). Connections live as long as the returned
    /// server.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<(RpcServer, SocketAddr)> {
        let addrs = resolve(addr)?;
        let io = IoRuntime::background("rpc-io")?;
        let listener = io.block_on(TcpListener::bind(&addrs[..]))?;
        let local = listener.local_addr()?;
        let (tx, rx) = unbounded();

        io.spawn(accept_loop(listener, tx));

        tracing::info!("RPC server listening on {}", local);
        Ok((RpcServer::with_transport(rx, io), local))
    }
}

async fn accept_loop(listener: TcpListener, calls: Sender<InboundCall>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let calls = calls.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer, calls).await {
                        tracing::warn!("RPC connection from {} ended with error: {}", peer, e);
                    }
                });
            }
            Err(e) => tracing::warn!("RPC accept failed: {}", e),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    calls: Sender<InboundCall>,
) -> Result<()> {
    tracing::debug!("RPC peer connected: {}", peer);
    stream.set_nodelay(true)?;
    let (read, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Dropping malformed RPC frame from {}: {}", peer, e);
                continue;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if calls.send(InboundCall::new(request, reply_tx)).is_err() {
            // Server owner is gone
            break;
        }
        let response = match reply_rx.await {
            Ok(response) => response,
            Err(_) => break,
        };

        let mut frame = serde_json::to_vec(&response)?;
        frame.push(b'\n');
        writer.write_all(&frame).await?;
    }

    tracing::debug!("RPC peer disconnected: {}", peer);
    Ok(())
}
