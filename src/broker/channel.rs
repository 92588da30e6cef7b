//! Channel membership
//!
//! A `Channel` holds the addresses of its subscribers, never the client
//! handles themselves; the broker resolves addresses through its client
//! index. Channels are created on first subscription and are never removed.

use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct Channel {
    pub name: String,
    pub subscribers: HashSet<String>,
}

impl Channel {
    /// Creates a channel with no subscribers.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber. Returns `false` if it was already subscribed.
    pub fn subscribe(&mut self, address: impl Into<String>) -> bool {
        self.subscribers.insert(address.into())
    }

    /// Remove a subscriber. Removing an absent address is a no-op.
    pub fn unsubscribe(&mut self, address: &str) -> bool {
        self.subscribers.remove(address)
    }
}
