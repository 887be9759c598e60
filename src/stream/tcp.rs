//! Data channel over TCP
//!
//! The subscriber listens; each publisher connects and writes one JSON
//! [`StreamMessage`] per line. Connections are read by tasks on a tokio
//! runtime owned by the subscriber; decoded frames go onto an unbounded
//! crossbeam queue that [`TcpDataSubscriber::drain`] empties from the
//! controller's thread.

use super::{DataPublisher, DataSubscriber, StreamMessage};
use crate::error::{Result, SweepCtlError};
use crate::transport::{resolve, IoRuntime};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

type Frame = std::result::Result<StreamMessage, String>;

/// Listening end of the data channel
pub struct TcpDataSubscriber {
    rx: Receiver<Frame>,
    local: SocketAddr,
    _io: IoRuntime,
}

impl TcpDataSubscriber {
    /// Bind and start accepting publishers
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let addrs = resolve(addr)?;
        let io = IoRuntime::background("data-io")?;
        let listener = io.block_on(TcpListener::bind(&addrs[..]))?;
        let local = listener.local_addr()?;
        let (tx, rx) = unbounded();

        io.spawn(accept_publishers(listener, tx));

        tracing::info!("Data subscriber listening on {}", local);
        Ok(Self { rx, local, _io: io })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl DataSubscriber for TcpDataSubscriber {
    fn drain(&mut self) -> Result<Vec<StreamMessage>> {
        let mut messages = Vec::new();
        for frame in self.rx.try_iter() {
            match frame {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    return Err(SweepCtlError::Serialization(format!(
                        "malformed data frame: {}",
                        e
                    )))
                }
            }
        }
        Ok(messages)
    }
}

async fn accept_publishers(listener: TcpListener, frames: Sender<Frame>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(read_frames(stream, peer, frames.clone()));
            }
            Err(e) => tracing::warn!("Data accept failed: {}", e),
        }
    }
}

async fn read_frames(stream: TcpStream, peer: SocketAddr, frames: Sender<Frame>) {
    tracing::debug!("Data publisher connected: {}", peer);

    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Data connection from {} failed: {}", peer, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame = serde_json::from_str::<StreamMessage>(&line).map_err(|e| e.to_string());
        if frames.send(frame).is_err() {
            break;
        }
    }
    tracing::debug!("Data publisher disconnected: {}", peer);
}

/// Connecting end of the data channel
pub struct TcpDataPublisher {
    stream: TcpStream,
    io: IoRuntime,
}

impl TcpDataPublisher {
    /// Connect to a subscriber
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let addrs = resolve(addr)?;
        let io = IoRuntime::caller_driven()?;
        let stream = io.block_on(TcpStream::connect(&addrs[..]))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, io })
    }
}

impl DataPublisher for TcpDataPublisher {
    fn publish(&mut self, message: &StreamMessage) -> Result<()> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');
        let stream = &mut self.stream;
        self.io.block_on(stream.write_all(&frame))?;
        Ok(())
    }
}
