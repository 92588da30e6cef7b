//! Broadcast client
//!
//! - `connection`: the connection state machine, reconnection and inbound
//!   dispatch to channel handlers.
//! - `queue`: the outgoing queue drained onto the live connection.

pub mod connection;
pub mod queue;

pub use connection::{ConnectionState, TcpBroadcastClient};
pub use queue::MessageQueue;

#[cfg(test)]
mod tests;
