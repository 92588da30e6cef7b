//! Wire-level message
//!
//! `WireMessage` is the payload of exactly one frame. Its JSON form uses the
//! field names `id`, `sender`, `channel`, `type`, `name`, `recipient`, `data`
//! and `persistent`; optional fields are omitted when empty and `persistent`
//! defaults to `true` when absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Message, generate_id, system::names};
use crate::utils::error::Result;

/// Sender stamped on messages that originate in the broker itself.
pub const SERVER_SENDER: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Data,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default = "generate_id")]
    pub id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default = "default_persistent")]
    pub persistent: bool,
}

fn default_persistent() -> bool {
    true
}

impl WireMessage {
    /// Data frame for every subscriber of `channel`.
    ///
    /// `sender` is left empty; the outgoing queue stamps it with the local
    /// address when the frame is written.
    pub fn channel_data(message: &Message, channel: &str) -> Self {
        Self {
            id: message.id.clone(),
            sender: String::new(),
            channel: Some(channel.to_string()),
            kind: MessageType::Data,
            name: Some(data_name(message.name.as_deref(), names::UNDEFINED)),
            recipient: None,
            data: message.data.clone(),
            persistent: message.persistent,
        }
    }

    /// Data frame addressed to a single client.
    pub fn recipient_data(message: &Message, recipient: &str) -> Self {
        Self {
            id: message.id.clone(),
            sender: String::new(),
            channel: None,
            kind: MessageType::Data,
            name: Some(data_name(message.name.as_deref(), names::UNDEFINED)),
            recipient: Some(recipient.to_string()),
            data: message.data.clone(),
            persistent: message.persistent,
        }
    }

    /// Broker-originated broadcast to `channel`.
    pub fn server_channel_data(message: &Message, channel: &str) -> Self {
        Self {
            sender: SERVER_SENDER.to_string(),
            name: Some(data_name(message.name.as_deref(), names::SERVER_CHANNEL_MESSAGE)),
            ..Self::channel_data(message, channel)
        }
    }

    /// Broker-originated message for the client at `address`.
    pub fn server_client_data(message: &Message, address: &str) -> Self {
        Self {
            sender: SERVER_SENDER.to_string(),
            name: Some(data_name(message.name.as_deref(), names::SERVER_CLIENT_MESSAGE)),
            ..Self::recipient_data(message, address)
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageType::System
    }

    /// Application view of this frame.
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id.clone(),
            client: self.recipient.clone(),
            channel: self.channel.clone(),
            name: self.name.clone(),
            data: self.data.clone(),
            persistent: self.persistent,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

fn data_name(name: Option<&str>, fallback: &str) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => fallback.to_string(),
    }
}
