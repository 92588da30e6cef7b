//! Broker routing engine
//!
//! The broker owns the authoritative client index (socket address →
//! [`ClientHandle`]), the channel map and the stash of undelivered persistent
//! messages. It is a plain synchronous state machine: the transport feeds it
//! decoded frames one at a time while holding the broker lock.

pub mod channel;
pub mod client_handle;
pub mod engine;
pub mod stash;

pub use channel::Channel;
pub use client_handle::{ClientHandle, Peer};
pub use engine::{Broker, IncomingMessage};
pub use stash::Stash;
