//! Message model
//!
//! Three layers of message live here:
//! - [`Message`]: what applications hand to a client or server. It names a
//!   target channel, a target client, or both.
//! - [`WireMessage`]: what actually crosses the socket, one per frame.
//! - [`SystemMessage`]: the fixed set of control-plane messages exchanged
//!   between clients and the broker. They travel as `WireMessage`s whose
//!   `type` is `SYSTEM`.

pub mod system;
pub mod wire;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use system::SystemMessage;
pub use wire::{MessageType, WireMessage};

/// Generate a fresh, globally unique message id.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Application-facing message.
///
/// `client` addresses a single connected client (by name or address) and
/// `channel` addresses every subscriber of a channel. Setting both sends the
/// message both ways. Messages are persistent unless marked [`transient`].
///
/// [`transient`]: Message::transient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub client: Option<String>,
    pub channel: Option<String>,
    pub name: Option<String>,
    pub data: Value,
    pub persistent: bool,
}

impl Message {
    pub fn new(client: Option<String>, channel: Option<String>, data: Value) -> Self {
        Self {
            id: generate_id(),
            client,
            channel,
            name: None,
            data,
            persistent: true,
        }
    }

    /// Message for every subscriber of `channel`.
    pub fn channel_message(channel: impl Into<String>, data: Value) -> Self {
        Self::new(None, Some(channel.into()), data)
    }

    /// Message for one client, matched by name or address on the broker.
    pub fn client_message(client: impl Into<String>, data: Value) -> Self {
        Self::new(Some(client.into()), None, data)
    }

    /// One message per channel, each with its own id.
    pub fn multi_channel_message<I, S>(channels: I, data: Value) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        channels
            .into_iter()
            .map(|channel| Self::channel_message(channel, data.clone()))
            .collect()
    }

    /// One message per client, each with its own id.
    pub fn group_message<I, S>(clients: I, data: Value) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        clients
            .into_iter()
            .map(|client| Self::client_message(client, data.clone()))
            .collect()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the generated id. An empty id keeps the generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.id = id;
        }
        self
    }

    /// Mark the message as not worth stashing when nobody receives it.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }
}
