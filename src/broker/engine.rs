//! Broker engine
//!
//! This module contains the in-memory routing state responsible for:
//! - tracking announced clients by socket address
//! - channel membership and fan-out
//! - direct delivery to a named or addressed client
//! - stashing persistent messages nobody received, and replaying them to the
//!   next subscriber of their channel
//!
//! Concurrency and usage notes:
//! - The API is synchronous and designed to be held behind a lock
//!   (`Arc<Mutex<Broker>>`) by the transport. Sends only push encoded frames
//!   into per-connection queues, so the lock is never held across socket I/O.
//! - Every inbound frame is handled on its own: a failure is returned to the
//!   caller for logging and leaves the rest of the state untouched.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::broker::channel::Channel;
use crate::broker::client_handle::{ClientHandle, Peer};
use crate::broker::stash::Stash;
use crate::message::wire::SERVER_SENDER;
use crate::message::{Message, MessageType, SystemMessage, WireMessage};
use crate::transport::codec;
use crate::utils::error::Result;

/// A data message paired with its resolved sender, ready for the
/// application-level hook.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub sender: ClientHandle,
    pub message: Message,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub clients: HashMap<String, ClientHandle>,
    pub channels: HashMap<String, Channel>,
    pub stash: Stash,
}

impl Broker {
    /// Creates a broker with no clients, channels or stashed messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and dispatch one frame payload received from `peer`.
    pub fn handle_frame(&mut self, peer: &Peer, payload: &[u8]) -> Result<Option<IncomingMessage>> {
        let message = WireMessage::from_slice(payload)?;
        self.handle_message(peer, message)
    }

    /// Dispatch a decoded frame by type: system frames update membership,
    /// data frames are routed.
    pub fn handle_message(
        &mut self,
        peer: &Peer,
        message: WireMessage,
    ) -> Result<Option<IncomingMessage>> {
        match message.kind {
            MessageType::Data => Ok(self.route(&peer.address, message)),
            MessageType::System => {
                match SystemMessage::from_wire(&message)? {
                    SystemMessage::ClientConnected { name, channels } => {
                        self.on_client_connected(peer, name, channels);
                    }
                    SystemMessage::ClientAddedMessageHandler { channel } => {
                        self.on_client_added_message_handler(&peer.address, &channel);
                    }
                    SystemMessage::ClientRemovedMessageHandler { channel } => {
                        self.unsubscribe(&channel, &peer.address);
                    }
                    other => {
                        debug!(address = %peer.address, name = other.name(), "ignoring system message");
                    }
                }
                Ok(None)
            }
        }
    }

    /// Record the client behind `peer` (keeping an existing handle) and
    /// subscribe it to every announced channel.
    pub fn on_client_connected(&mut self, peer: &Peer, name: String, channels: Vec<String>) {
        let client = self
            .clients
            .entry(peer.address.clone())
            .or_insert_with(|| ClientHandle::new(peer, name));
        info!(address = %client.address, name = %client.name, "client connection open");

        for channel in channels {
            self.subscribe(&channel, &peer.address);
        }
    }

    fn on_client_added_message_handler(&mut self, address: &str, channel: &str) {
        if self.subscribe(channel, address) {
            info!(address, channel, "client is listening to channel");
        } else {
            warn!(address, channel, "handler added by a client that never announced itself");
        }
    }

    /// Subscribe the known client at `address` to `channel`, creating the
    /// channel if needed, then hand it anything stashed for that channel.
    ///
    /// Returns `false` when no client is registered under `address`.
    pub fn subscribe(&mut self, channel: &str, address: &str) -> bool {
        let Some(client) = self.clients.get_mut(address) else {
            return false;
        };
        client.channels.insert(channel.to_string());

        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| Channel::new(channel))
            .subscribe(address);

        self.resend_stashed_messages(address, channel);
        true
    }

    /// Unsubscribes `address` from `channel`. Unknown channels are ignored.
    pub fn unsubscribe(&mut self, channel: &str, address: &str) {
        if let Some(c) = self.channels.get_mut(channel) {
            if c.unsubscribe(address) {
                info!(address, channel, "client stopped listening to channel");
            }
        }
        if let Some(client) = self.clients.get_mut(address) {
            client.channels.remove(channel);
        }
    }

    fn resend_stashed_messages(&mut self, address: &str, channel: &str) {
        let messages = self.stash.pop(Some(channel));
        if messages.is_empty() {
            return;
        }

        let Some(client) = self.clients.get(address) else {
            self.stash.restore(Some(channel), messages);
            return;
        };

        let mut undelivered = Vec::new();
        for message in messages {
            match client.send(&message) {
                Ok(()) => info!(
                    id = %message.id,
                    channel,
                    name = message.name.as_deref().unwrap_or_default(),
                    "stashed message has been resent"
                ),
                Err(e) => {
                    warn!(id = %message.id, channel, error = %e, "failed to resend stashed message");
                    undelivered.push(message);
                }
            }
        }
        self.stash.restore(Some(channel), undelivered);
    }

    /// Find a client by name or address.
    pub fn find_client(&self, name_or_address: &str) -> Option<&ClientHandle> {
        self.clients
            .get(name_or_address)
            .or_else(|| self.clients.values().find(|c| c.matches(name_or_address)))
    }

    /// Route a data message that arrived from `origin`.
    ///
    /// The message goes to its recipient (if resolvable) and to every other
    /// subscriber of its channel. A persistent message that nobody received
    /// is stashed under its channel (or the channel-less bucket when it only
    /// named a recipient) and its sender gets a `MessageNotDelivered` notice.
    pub fn route(&mut self, origin: &str, message: WireMessage) -> Option<IncomingMessage> {
        let sender = self.clients.get(origin).cloned();
        if sender.is_none() {
            warn!(address = origin, "no client found with address");
        }

        let incoming = sender.clone().map(|sender| IncomingMessage {
            sender,
            message: message.to_message(),
        });

        let mut delivered = false;

        if let Some(recipient) = message.recipient.as_deref() {
            match self.find_client(recipient) {
                Some(client) => match client.send(&message) {
                    Ok(()) => delivered = true,
                    Err(e) => warn!(recipient, error = %e, "direct delivery failed"),
                },
                None => debug!(recipient, "recipient not connected"),
            }
        }

        if let Some(channel) = message.channel.as_deref() {
            if self.channels.contains_key(channel) {
                match self.broadcast(channel, &message, Some(origin)) {
                    Ok(sent) => delivered |= sent,
                    Err(e) => warn!(channel, error = %e, "failed to broadcast message"),
                }
            }
        }

        if !delivered && message.persistent {
            if let Some(sender) = &sender {
                let notice = SystemMessage::MessageNotDelivered {
                    message: Box::new(message.clone()),
                }
                .into_wire(SERVER_SENDER)
                .and_then(|notice| sender.send(&notice));
                if let Err(e) = notice {
                    warn!(address = origin, error = %e, "failed to notify sender");
                }
            }

            let (id, channel) = (message.id.clone(), message.channel.clone());
            if self.stash.add(message) {
                info!(
                    %id,
                    channel = channel.as_deref().unwrap_or_default(),
                    "message stashed"
                );
            }
        }

        incoming
    }

    /// Send `message` to every subscriber of `channel` except `exclude`.
    ///
    /// Returns whether at least one subscriber accepted it.
    pub fn broadcast(
        &self,
        channel: &str,
        message: &WireMessage,
        exclude: Option<&str>,
    ) -> Result<bool> {
        let Some(channel) = self.channels.get(channel) else {
            return Ok(false);
        };

        let frame = codec::encode(message)?;
        let mut sent = false;
        for address in &channel.subscribers {
            if exclude == Some(address.as_str()) {
                continue;
            }
            match self.clients.get(address) {
                Some(client) => match client.send_frame(frame.clone()) {
                    Ok(()) => sent = true,
                    Err(e) => warn!(%address, error = %e, "failed to send to subscriber"),
                },
                None => warn!(%address, channel = %channel.name, "no client registered for subscriber"),
            }
        }
        Ok(sent)
    }

    /// Send a broker-originated message.
    ///
    /// Channel and client targets are handled independently; a message with
    /// neither is dropped.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        if let Some(channel) = message.channel.as_deref() {
            if self.channels.contains_key(channel) {
                let wire = WireMessage::server_channel_data(message, channel);
                self.broadcast(channel, &wire, None)?;
            } else {
                warn!(channel, "channel does not exist, message cannot be sent");
            }
        }

        if let Some(target) = message.client.as_deref() {
            match self.find_client(target) {
                Some(client) => {
                    let wire = WireMessage::server_client_data(message, &client.address);
                    if let Err(e) = client.send(&wire) {
                        warn!(client = target, error = %e, "failed to send message to client");
                    }
                }
                None => debug!(client = target, "client not connected, message dropped"),
            }
        }

        Ok(())
    }

    /// Removes a client and sweeps its address out of every channel, not just
    /// the channels it announced.
    pub fn cleanup_client(&mut self, address: &str) {
        let removed = self.clients.remove(address);

        for channel in self.channels.values_mut() {
            channel.unsubscribe(address);
        }

        match removed {
            Some(client) => info!(address, name = %client.name, "client connection closed"),
            None => debug!(address, "connection closed before the client announced itself"),
        }
    }
}
