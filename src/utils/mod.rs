//! The `utils` module provides the pieces shared by the client, broker and
//! transport layers: the crate-wide error type and logging setup.

pub mod error;
pub mod logging;

pub use error::BroadcastError;
