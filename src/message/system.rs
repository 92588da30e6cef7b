//! Control-plane messages
//!
//! System messages are told apart from data by `WireMessage::kind`, and the
//! variant is selected by `name`. Each variant has a fixed `data` shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MessageType, WireMessage, generate_id};
use crate::utils::error::{BroadcastError, Result};

pub mod names {
    pub const UNDEFINED: &str = "UNDEFINED";
    pub const CLIENT_CONNECTED: &str = "CLIENT_CONNECTED";
    pub const CLIENT_DISCONNECTED: &str = "CLIENT_DISCONNECTED";
    pub const CLIENT_ADDED_MESSAGE_HANDLER: &str = "ADDED_MESSAGE_HANDLER";
    pub const CLIENT_REMOVED_MESSAGE_HANDLER: &str = "REMOVED_MESSAGE_HANDLER";
    pub const MESSAGE_NOT_DELIVERED: &str = "MESSAGE_NOT_DELIVERED";
    pub const SERVER_CHANNEL_MESSAGE: &str = "server-channel-message";
    pub const SERVER_CLIENT_MESSAGE: &str = "server-client-message";
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemMessage {
    /// Sent by a client right after the socket connects.
    ClientConnected { name: String, channels: Vec<String> },
    ClientDisconnected { name: String },
    /// The client registered a handler and wants the channel's traffic.
    ClientAddedMessageHandler { channel: String },
    ClientRemovedMessageHandler { channel: String },
    /// Sent by the broker to the origin of a persistent message nobody got.
    MessageNotDelivered { message: Box<WireMessage> },
}

#[derive(Serialize, Deserialize)]
struct ClientConnectedData {
    name: String,
    #[serde(default)]
    channels: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ClientDisconnectedData {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct MessageHandlerData {
    channel: String,
}

impl SystemMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => names::CLIENT_CONNECTED,
            Self::ClientDisconnected { .. } => names::CLIENT_DISCONNECTED,
            Self::ClientAddedMessageHandler { .. } => names::CLIENT_ADDED_MESSAGE_HANDLER,
            Self::ClientRemovedMessageHandler { .. } => names::CLIENT_REMOVED_MESSAGE_HANDLER,
            Self::MessageNotDelivered { .. } => names::MESSAGE_NOT_DELIVERED,
        }
    }

    /// Wrap this control message in a `SYSTEM` frame.
    pub fn into_wire(self, sender: impl Into<String>) -> Result<WireMessage> {
        let name = self.name().to_string();
        let mut recipient = None;
        let data = match self {
            Self::ClientConnected { name, channels } => {
                serde_json::to_value(ClientConnectedData { name, channels })?
            }
            Self::ClientDisconnected { name } => {
                serde_json::to_value(ClientDisconnectedData { name })?
            }
            Self::ClientAddedMessageHandler { channel }
            | Self::ClientRemovedMessageHandler { channel } => {
                serde_json::to_value(MessageHandlerData { channel })?
            }
            Self::MessageNotDelivered { message } => {
                recipient = Some(message.sender.clone());
                serde_json::to_value(&*message)?
            }
        };

        Ok(WireMessage {
            id: generate_id(),
            sender: sender.into(),
            channel: None,
            kind: MessageType::System,
            name: Some(name),
            recipient,
            data,
            persistent: true,
        })
    }

    /// Interpret a `SYSTEM` frame.
    pub fn from_wire(wire: &WireMessage) -> Result<Self> {
        if wire.kind != MessageType::System {
            return Err(BroadcastError::UnknownSystemMessage(format!(
                "frame {} is not a system message",
                wire.id
            )));
        }

        let data = wire.data.clone();
        match wire.name.as_deref().unwrap_or(names::UNDEFINED) {
            names::CLIENT_CONNECTED => {
                let ClientConnectedData { name, channels } = from_data(data)?;
                Ok(Self::ClientConnected { name, channels })
            }
            names::CLIENT_DISCONNECTED => {
                let ClientDisconnectedData { name } = from_data(data)?;
                Ok(Self::ClientDisconnected { name })
            }
            names::CLIENT_ADDED_MESSAGE_HANDLER => {
                let MessageHandlerData { channel } = from_data(data)?;
                Ok(Self::ClientAddedMessageHandler { channel })
            }
            names::CLIENT_REMOVED_MESSAGE_HANDLER => {
                let MessageHandlerData { channel } = from_data(data)?;
                Ok(Self::ClientRemovedMessageHandler { channel })
            }
            names::MESSAGE_NOT_DELIVERED => Ok(Self::MessageNotDelivered {
                message: Box::new(from_data(data)?),
            }),
            other => Err(BroadcastError::UnknownSystemMessage(other.to_string())),
        }
    }
}

fn from_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    Ok(serde_json::from_value(data)?)
}
