//! # tcp-broadcast
//!
//! `tcp-broadcast` is an in-memory publish/subscribe broker and client that
//! speak length-prefixed JSON frames over TCP, or over a local socket path on
//! Unix. Clients subscribe to named channels and can address single clients
//! by name. Persistent messages that reach nobody are stashed and replayed to
//! the next subscriber of their channel.
//!
//! ## Modules
//!
//! - `broker`: connection tracking, channel membership, routing and the stash.
//! - `client`: the reconnecting client and its outgoing queue.
//! - `config`: file and environment configuration with an optional prefix.
//! - `message`: application messages, wire frames and system messages.
//! - `transport`: framing, sockets, the server accept loop and the capability
//!   traits.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod message;
pub mod transport;
pub mod utils;

pub use client::{ConnectionState, TcpBroadcastClient};
pub use message::Message;
pub use transport::{BroadcastClient, BroadcastServer, TcpBroadcastServer};
pub use utils::BroadcastError;

#[cfg(test)]
mod tests;
