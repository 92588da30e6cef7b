//! Broker accept loop
//!
//! `TcpBroadcastServer` binds the configured target and runs one task per
//! accepted connection. Each connection gets a writer task fed by an unbounded
//! channel of encoded frames, and a read loop that reassembles frames and hands
//! them to the shared [`Broker`] one at a time.
//!
//! The broker lock is only taken for synchronous state updates. The
//! application hook runs in its own task once the lock has been released, so
//! a slow or panicking hook never stalls or kills the connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, IncomingMessage, Peer};
use crate::config::Settings;
use crate::message::Message;
use crate::transport::codec::FrameBuffer;
use crate::transport::stream::{Connection, ConnectionTarget, Listener};
use crate::transport::traits::{BroadcastServer, ClientMessageHandler};
use crate::utils::error::Result;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by the accept loop and every connection task.
#[derive(Clone)]
struct Shared {
    broker: Arc<Mutex<Broker>>,
    handler: Arc<RwLock<Option<ClientMessageHandler>>>,
    max_frame_size: usize,
}

impl Shared {
    fn lock_broker(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> Option<ClientMessageHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn handle_frame(&self, peer: &Peer, payload: &[u8]) {
        let result = {
            let mut broker = self.lock_broker();
            broker.handle_frame(peer, payload)
        };

        let incoming = match result {
            Ok(Some(incoming)) => incoming,
            Ok(None) => return,
            Err(e) => {
                warn!(address = %peer.address, error = %e, "dropping frame");
                return;
            }
        };

        if let Some(handler) = self.handler() {
            let IncomingMessage { sender, message } = incoming;
            let (address, id) = (sender.address.clone(), message.id.clone());
            // A panicking hook only takes down its own task.
            let hook = tokio::spawn(handler(sender, message));
            tokio::spawn(async move {
                if let Err(e) = hook.await {
                    if e.is_panic() {
                        error!(%address, %id, "message hook panicked");
                    }
                }
            });
        }
    }

    async fn handle_connection(self, connection: Connection) {
        let Connection {
            mut reader,
            mut writer,
            peer_address,
            ..
        } = connection;

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let peer = Peer::new(peer_address, tx);
        debug!(address = %peer.address, "connection accepted");
        let _cleanup = CleanupGuard {
            broker: Arc::clone(&self.broker),
            address: peer.address.clone(),
        };

        let address = peer.address.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(%address, error = %e, "failed to write frame");
                    break;
                }
            }
            debug!(%address, "writer closed");
        });

        let mut frames = FrameBuffer::new(self.max_frame_size);
        loop {
            match reader.read_buf(frames.buffer_mut()).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(address = %peer.address, error = %e, "connection error");
                    break;
                }
            }

            let payloads = match frames.frames() {
                Ok(payloads) => payloads,
                Err(e) => {
                    warn!(address = %peer.address, error = %e, "closing connection");
                    break;
                }
            };
            for payload in payloads {
                self.handle_frame(&peer, &payload);
            }
        }
    }
}

/// Removes the connection's client from the broker on every exit path,
/// including a panic in the read loop. The writer task ends once the broker's
/// handle and the connection's `Peer` are gone.
struct CleanupGuard {
    broker: Arc<Mutex<Broker>>,
    address: String,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.broker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cleanup_client(&self.address);
    }
}

pub struct TcpBroadcastServer {
    target: ConnectionTarget,
    shared: Shared,
    local_address: Mutex<Option<String>>,
}

impl TcpBroadcastServer {
    /// Fails with a configuration error when `settings` names no usable target.
    pub fn new(settings: &Settings) -> Result<Self> {
        let target = settings.connection.target()?;
        Ok(Self {
            target,
            shared: Shared {
                broker: Arc::new(Mutex::new(Broker::new())),
                handler: Arc::new(RwLock::new(None)),
                max_frame_size: settings.transport.max_frame_size,
            },
            local_address: Mutex::new(None),
        })
    }

    /// The bound address, once `start` has succeeded.
    pub fn local_address(&self) -> Option<String> {
        self.local_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared routing state, for inspection and for tests.
    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        Arc::clone(&self.shared.broker)
    }
}

#[async_trait]
impl BroadcastServer for TcpBroadcastServer {
    async fn start(&self) -> Result<()> {
        let mut listener = Listener::bind(&self.target).await?;
        let address = listener.local_address()?;
        info!(%address, "broadcast server listening");
        *self
            .local_address
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(address);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(connection) => {
                        tokio::spawn(shared.clone().handle_connection(connection));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });

        Ok(())
    }

    fn on_message(&self, handler: ClientMessageHandler) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn send_message(&self, message: Message) -> Result<()> {
        self.shared.lock_broker().send_message(&message)
    }
}
