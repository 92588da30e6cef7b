//! The `transport` module owns everything that touches a socket.
//!
//! - `codec`: length-prefixed framing of wire messages.
//! - `stream`: connection targets, listeners and the boxed read/write halves
//!   shared by TCP and local-socket connections.
//! - `server`: the broker's accept loop and per-connection tasks.
//! - `traits`: the client and server capability contracts.

pub mod codec;
pub mod server;
pub mod stream;
pub mod traits;

pub use server::TcpBroadcastServer;
pub use stream::{Connection, ConnectionTarget, Listener};
pub use traits::{
    BroadcastClient, BroadcastServer, ClientMessageHandler, MessageHandler,
    client_message_handler, message_handler,
};
