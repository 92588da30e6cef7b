use std::collections::HashMap;

use crate::message::WireMessage;

/// Persistent messages that reached nobody, kept per channel until someone
/// subscribes.
///
/// Messages without a channel (an unresolved direct recipient) share the
/// `None` bucket.
#[derive(Debug, Default)]
pub struct Stash {
    messages_by_channel: HashMap<Option<String>, Vec<WireMessage>>,
}

fn key(channel: Option<&str>) -> Option<String> {
    channel.map(str::to_string)
}

impl Stash {
    /// Creates an empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` under its channel. Transient messages are refused.
    pub fn add(&mut self, message: WireMessage) -> bool {
        if !message.persistent {
            return false;
        }
        self.messages_by_channel
            .entry(message.channel.clone())
            .or_default()
            .push(message);
        true
    }

    /// Take every message stashed for `channel`. A second pop returns nothing.
    pub fn pop(&mut self, channel: Option<&str>) -> Vec<WireMessage> {
        self.messages_by_channel
            .remove(&key(channel))
            .unwrap_or_default()
    }

    /// Put messages back in front of anything stashed since they were popped.
    pub fn restore(&mut self, channel: Option<&str>, mut messages: Vec<WireMessage>) {
        if messages.is_empty() {
            return;
        }
        let list = self.messages_by_channel.entry(key(channel)).or_default();
        messages.append(list);
        *list = messages;
    }

    /// Number of messages waiting under `channel`.
    pub fn len(&self, channel: Option<&str>) -> usize {
        self.messages_by_channel
            .get(&key(channel))
            .map_or(0, Vec::len)
    }

    /// Whether nothing is stashed under any channel.
    pub fn is_empty(&self) -> bool {
        self.messages_by_channel.values().all(Vec::is_empty)
    }
}
