//! Client connection engine
//!
//! A [`TcpBroadcastClient`] moves through three states:
//!
//! ```text
//! Offline --connect()--> Connecting --connected--> Online
//!    ^                       |                       |
//!    +------- failure -------+------ error / EOF ----+
//! ```
//!
//! Every transition back to `Offline` stops the outgoing queue and schedules
//! one `connect()` after the reconnect delay. `connect()` does nothing unless
//! the client is still offline, so a manual connect during the delay wins and
//! the scheduled one becomes a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::queue::MessageQueue;
use crate::config::Settings;
use crate::message::{Message, SystemMessage, WireMessage, generate_id};
use crate::transport::codec::FrameBuffer;
use crate::transport::stream::{Connection, ConnectionTarget};
use crate::transport::traits::{BroadcastClient, MessageHandler};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Online,
}

struct ClientState {
    connection: ConnectionState,
    address: String,
    handlers: HashMap<String, MessageHandler>,
    direct_handler: Option<MessageHandler>,
    queue: MessageQueue,
    connect_attempts: u64,
}

struct Inner {
    name: String,
    target: ConnectionTarget,
    reconnect_delay: Duration,
    max_frame_size: usize,
    state: Mutex<ClientState>,
}

/// Broadcast client over TCP or a local socket.
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct TcpBroadcastClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for TcpBroadcastClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpBroadcastClient")
            .field("name", &self.inner.name)
            .field("target", &self.inner.target)
            .field("state", &self.state())
            .finish()
    }
}

impl TcpBroadcastClient {
    /// Build a client named after the configuration, or a generated id.
    ///
    /// Fails with a configuration error when no target is configured.
    pub fn new(settings: &Settings) -> Result<Self> {
        let name = settings.client.name.clone().unwrap_or_else(generate_id);
        Self::with_name(settings, name)
    }

    pub fn with_name(settings: &Settings, name: impl Into<String>) -> Result<Self> {
        let target = settings.connection.target()?;
        Ok(Self {
            inner: Arc::new(Inner {
                name: name.into(),
                target,
                reconnect_delay: Duration::from_millis(settings.client.reconnect_delay_ms),
                max_frame_size: settings.transport.max_frame_size,
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Offline,
                    address: String::new(),
                    handlers: HashMap::new(),
                    direct_handler: None,
                    queue: MessageQueue::new(),
                    connect_attempts: 0,
                }),
            }),
        })
    }

    /// Name announced to the broker.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// Local address of the current connection.
    pub fn address(&self) -> Option<String> {
        let state = self.inner.lock();
        (state.connection == ConnectionState::Online).then(|| state.address.clone())
    }

    /// How many times a connection attempt has actually started.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.lock().connect_attempts
    }

    /// Frames waiting for the next drain.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Stop listening to `channel` and tell the broker.
    pub fn remove_message_handler(&self, channel: &str) -> Result<()> {
        let mut state = self.inner.lock();
        if state.handlers.remove(channel).is_none() {
            debug!(channel, "no handler registered for channel");
            return Ok(());
        }
        let notice = SystemMessage::ClientRemovedMessageHandler {
            channel: channel.to_string(),
        }
        .into_wire(state.address.clone())?;
        state.queue.add(notice)
    }

    /// Handler for messages addressed to this client without a channel.
    pub fn on_direct_message(&self, handler: MessageHandler) {
        self.inner.lock().direct_handler = Some(handler);
    }
}

impl BroadcastClient for TcpBroadcastClient {
    fn connect(&self) {
        self.inner.connect();
    }

    /// A channel target and a client target each produce their own frame.
    ///
    /// On error the frame stays queued and goes out after the next connect.
    fn send_message(&self, message: Message) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(channel) = message.channel.as_deref() {
            state.queue.add(WireMessage::channel_data(&message, channel))?;
        }
        if let Some(client) = message.client.as_deref() {
            state.queue.add(WireMessage::recipient_data(&message, client))?;
        }
        Ok(())
    }

    fn on_message(&self, channel: &str, handler: MessageHandler) -> Result<()> {
        let mut state = self.inner.lock();
        state.handlers.insert(channel.to_string(), handler);
        let notice = SystemMessage::ClientAddedMessageHandler {
            channel: channel.to_string(),
        }
        .into_wire(state.address.clone())?;
        state.queue.add(notice)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.connection != ConnectionState::Offline {
                return;
            }
            state.connection = ConnectionState::Connecting;
            state.connect_attempts += 1;
        }

        debug!(name = %self.name, server = %self.target, "connecting");
        tokio::spawn(Arc::clone(self).run());
    }

    async fn run(self: Arc<Self>) {
        match self.target.connect().await {
            Ok(connection) => self.serve(connection).await,
            Err(e) => warn!(name = %self.name, server = %self.target, error = %e, "connection failed"),
        }

        {
            let mut state = self.lock();
            state.connection = ConnectionState::Offline;
            state.queue.stop();
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.reconnect_delay).await;
            inner.connect();
        });
    }

    async fn serve(&self, connection: Connection) {
        let Connection {
            mut reader,
            mut writer,
            local_address,
            ..
        } = connection;
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        self.go_online(&local_address, tx);
        info!(name = %self.name, address = %local_address, "connected to broadcast server");

        let mut frames = FrameBuffer::new(self.max_frame_size);
        loop {
            tokio::select! {
                Some(frame) = rx.recv() => {
                    if let Err(e) = writer.write_all(&frame).await {
                        warn!(address = %local_address, error = %e, "write failed");
                        break;
                    }
                }
                read = reader.read_buf(frames.buffer_mut()) => {
                    match read {
                        Ok(0) => {
                            info!(address = %local_address, "server closed the connection");
                            break;
                        }
                        Ok(_) => match frames.frames() {
                            Ok(payloads) => {
                                for payload in payloads {
                                    self.dispatch(&payload).await;
                                }
                            }
                            Err(e) => {
                                warn!(address = %local_address, error = %e, "closing connection");
                                break;
                            }
                        },
                        Err(e) => {
                            warn!(address = %local_address, error = %e, "read failed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Announce ourselves with every channel that has a handler, then start
    /// draining the queue onto the new connection.
    fn go_online(&self, local_address: &str, writer: mpsc::UnboundedSender<Bytes>) {
        let mut state = self.lock();
        state.connection = ConnectionState::Online;
        state.address = local_address.to_string();

        let hello = SystemMessage::ClientConnected {
            name: self.name.clone(),
            channels: state.handlers.keys().cloned().collect(),
        }
        .into_wire(local_address);
        match hello {
            Ok(hello) => {
                if let Err(e) = state.queue.add(hello) {
                    warn!(error = %e, "failed to queue announcement");
                }
            }
            Err(e) => warn!(error = %e, "failed to build announcement"),
        }

        if let Err(e) = state.queue.start(local_address, writer) {
            warn!(error = %e, "failed to drain outgoing queue");
        }
    }

    async fn dispatch(&self, payload: &[u8]) {
        let message = match WireMessage::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        if message.is_system() {
            self.on_system_message(&message);
            return;
        }

        let handler = {
            let state = self.lock();
            match message.channel.as_deref() {
                Some(channel) => state.handlers.get(channel).cloned(),
                None => state.direct_handler.clone(),
            }
        };

        match handler {
            Some(handler) => handler(message.to_message()).await,
            None => debug!(
                id = %message.id,
                channel = message.channel.as_deref().unwrap_or_default(),
                "no handler for message"
            ),
        }
    }

    fn on_system_message(&self, message: &WireMessage) {
        match SystemMessage::from_wire(message) {
            Ok(SystemMessage::MessageNotDelivered { message }) => warn!(
                id = %message.id,
                channel = message.channel.as_deref().unwrap_or_default(),
                name = message.name.as_deref().unwrap_or_default(),
                "message was not delivered and has been stashed"
            ),
            Ok(other) => debug!(name = other.name(), "ignoring system message"),
            Err(e) => warn!(error = %e, "invalid system message"),
        }
    }
}
