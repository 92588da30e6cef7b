use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::message::WireMessage;
use crate::transport::codec;
use crate::utils::error::{BroadcastError, Result};

/// One accepted socket as seen by the broker: its remote address and the
/// queue feeding its writer task.
#[derive(Debug, Clone)]
pub struct Peer {
    pub address: String,
    pub outbound: UnboundedSender<Bytes>,
}

impl Peer {
    /// Wraps the remote address and the sender feeding the writer task.
    pub fn new(address: impl Into<String>, outbound: UnboundedSender<Bytes>) -> Self {
        Self {
            address: address.into(),
            outbound,
        }
    }
}

/// A connected client that has announced itself.
///
/// Handles are owned by the broker's client index; channels refer to them by
/// `address` only.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub address: String,
    pub name: String,
    pub channels: HashSet<String>,
    sender: UnboundedSender<Bytes>,
}

impl ClientHandle {
    /// Handle for the client behind `peer`, subscribed to nothing yet.
    pub fn new(peer: &Peer, name: impl Into<String>) -> Self {
        Self {
            address: peer.address.clone(),
            name: name.into(),
            channels: HashSet::new(),
            sender: peer.outbound.clone(),
        }
    }

    /// Encode `message` and queue it for this client's socket.
    pub fn send(&self, message: &WireMessage) -> Result<()> {
        self.send_frame(codec::encode(message)?)
    }

    /// Queue an already encoded frame. Fails once the connection's writer
    /// has gone away.
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| BroadcastError::Send(format!("connection {} is closed", self.address)))
    }

    /// Whether `name_or_address` identifies this client.
    pub fn matches(&self, name_or_address: &str) -> bool {
        self.name == name_or_address || self.address == name_or_address
    }
}
