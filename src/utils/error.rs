//! The `error` module defines the error taxonomy used across `tcp-broadcast`.
//!
//! A message that reaches no subscriber is not an error: the broker stashes it
//! and notifies the sender instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BroadcastError>;

#[derive(Debug, Error)]
pub enum BroadcastError {
    /// No usable connection target was configured.
    #[error("wrong connection options: {0}")]
    Configuration(String),

    /// The transport write path is gone.
    #[error("an error occurred while sending a message: {0}")]
    Send(String),

    #[error("malformed payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown system message: {0}")]
    UnknownSystemMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
