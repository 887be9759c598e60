//! One-way data channel from the acquisition process to the controller
//!
//! The acquisition process publishes [`StreamMessage`]s; the controller holds
//! a [`DataSubscriber`] and drains every pending message once per polling
//! tick. Completion and failure reports travel on the same channel as the
//! scans so they can never overtake data that was read before them.
//!
//! Subscribers buffer without bound: the producer never waits for the
//! controller, and draining "all pending" per tick keeps the backlog from
//! growing under load.
//!
//! # Components
//!
//! - [`ContinuityValidator`] - rejects gaps and reorderings in scan indices
//! - [`ScalingStage`] - converts raw counts to physical units
//! - [`channel`] - in-process publisher/subscriber pair
//! - [`tcp`] - newline-delimited JSON over TCP

pub mod continuity;
pub mod scaling;
pub mod tcp;

pub use continuity::ContinuityValidator;
pub use scaling::{ChannelScaling, ScaledChunk, ScalingStage};
pub use tcp::{TcpDataPublisher, TcpDataSubscriber};

use crate::error::{Result, SweepCtlError};
use crate::types::ScanChunk;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

/// Message carried by the data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// A chunk of acquired scans
    Scans(ScanChunk),
    /// Acquisition is no longer armed or acquiring for this sweep
    AcquisitionDidFinish,
    /// Acquisition failed
    AcquisitionDidFail {
        /// Description of the failure
        message: String,
    },
}

/// Controller-side end of the data channel
pub trait DataSubscriber: Send {
    /// Take every message currently buffered, oldest first, without blocking
    fn drain(&mut self) -> Result<Vec<StreamMessage>>;
}

/// Producer-side end of the data channel
pub trait DataPublisher: Send {
    /// Publish one message
    fn publish(&mut self, message: &StreamMessage) -> Result<()>;
}

/// In-process publisher
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: Sender<StreamMessage>,
}

impl DataPublisher for ChannelPublisher {
    fn publish(&mut self, message: &StreamMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| SweepCtlError::Channel("data subscriber disconnected".to_string()))
    }
}

/// In-process subscriber
#[derive(Debug)]
pub struct ChannelSubscriber {
    rx: Receiver<StreamMessage>,
    disconnected_logged: bool,
}

impl ChannelSubscriber {
    /// Number of messages waiting to be drained
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

impl DataSubscriber for ChannelSubscriber {
    fn drain(&mut self) -> Result<Vec<StreamMessage>> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected_logged {
                        tracing::debug!("All data publishers have disconnected");
                        self.disconnected_logged = true;
                    }
                    break;
                }
            }
        }
        Ok(messages)
    }
}

/// Create a connected in-process publisher/subscriber pair
pub fn channel() -> (ChannelPublisher, ChannelSubscriber) {
    let (tx, rx) = unbounded();
    (
        ChannelPublisher { tx },
        ChannelSubscriber {
            rx,
            disconnected_logged: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Matrix;

    #[test]
    fn test_drain_returns_everything_in_order() {
        let (mut publisher, mut subscriber) = channel();
        for i in 0..5u64 {
            let chunk = ScanChunk::analog_only(i * 10, Matrix::zeros(10, 1), 0.0);
            publisher.publish(&StreamMessage::Scans(chunk)).unwrap();
        }
        publisher.publish(&StreamMessage::AcquisitionDidFinish).unwrap();
        assert_eq!(subscriber.backlog(), 6);

        let drained = subscriber.drain().unwrap();
        assert_eq!(drained.len(), 6);
        assert!(matches!(drained[0], StreamMessage::Scans(ref c) if c.scan_index == 0));
        assert!(matches!(drained[4], StreamMessage::Scans(ref c) if c.scan_index == 40));
        assert_eq!(drained[5], StreamMessage::AcquisitionDidFinish);
        assert!(subscriber.drain().unwrap().is_empty());
    }

    #[test]
    fn test_drain_after_publisher_dropped() {
        let (mut publisher, mut subscriber) = channel();
        publisher.publish(&StreamMessage::AcquisitionDidFinish).unwrap();
        drop(publisher);
        assert_eq!(subscriber.drain().unwrap().len(), 1);
        assert!(subscriber.drain().unwrap().is_empty());
    }

    #[test]
    fn test_message_wire_format_is_tagged() {
        let json = serde_json::to_value(StreamMessage::AcquisitionDidFail {
            message: "overrun".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "acquisition_did_fail");
        assert_eq!(json["message"], "overrun");
    }
}
