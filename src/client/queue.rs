//! Outgoing message queue
//!
//! Data messages leave in the order they were added. System messages jump to
//! the head of the queue, so among themselves the most recently added one
//! leaves first.
//!
//! Draining is edge-triggered: it happens on `start` and on every `add` while
//! started, never on a timer. Stopping keeps whatever is still queued for the
//! next `start`.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::message::WireMessage;
use crate::transport::codec;
use crate::utils::error::{BroadcastError, Result};

#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: VecDeque<WireMessage>,
    started: bool,
    address: String,
    writer: Option<UnboundedSender<Bytes>>,
}

impl MessageQueue {
    /// Creates an empty, stopped queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `message` and drain immediately if the queue is running.
    pub fn add(&mut self, message: WireMessage) -> Result<()> {
        if message.is_system() {
            self.queue.push_front(message);
        } else {
            self.queue.push_back(message);
        }

        if self.started {
            self.drain()?;
        }
        Ok(())
    }

    /// Start writing to `writer`, stamping `address` as the sender of every
    /// frame. Returns the number of frames written by this drain.
    pub fn start(&mut self, address: impl Into<String>, writer: UnboundedSender<Bytes>) -> Result<usize> {
        self.address = address.into();
        self.writer = Some(writer);
        self.started = true;
        self.drain()
    }

    /// Stop draining. Queued messages are kept for the next `start`.
    pub fn stop(&mut self) {
        self.started = false;
        self.writer = None;
    }

    /// Number of messages waiting to be written.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn drain(&mut self) -> Result<usize> {
        let mut sent = 0;
        while self.started {
            let Some(writer) = self.writer.clone() else {
                break;
            };
            let Some(mut message) = self.queue.pop_front() else {
                break;
            };

            message.sender = self.address.clone();
            let frame = codec::encode(&message)?;
            if writer.send(frame).is_err() {
                // the frame goes back to the head and waits for the next start
                self.queue.push_front(message);
                self.stop();
                return Err(BroadcastError::Send("connection writer is closed".into()));
            }
            sent += 1;
        }

        if sent > 0 {
            debug!(sent, remaining = self.queue.len(), "drained outgoing queue");
        }
        Ok(sent)
    }
}
