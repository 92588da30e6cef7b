//! Capability contracts
//!
//! Any transport can back a broadcast client or server as long as it exposes
//! these operations. The TCP implementations live in `client::connection` and
//! `transport::server`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::broker::ClientHandle;
use crate::message::Message;
use crate::utils::error::Result;

/// Per-channel handler registered on a client.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Broker-wide hook receiving every data message together with its sender.
pub type ClientMessageHandler =
    Arc<dyn Fn(ClientHandle, Message) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn message_handler<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(handler(message)))
}

pub fn client_message_handler<F, Fut>(handler: F) -> ClientMessageHandler
where
    F: Fn(ClientHandle, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |sender, message| Box::pin(handler(sender, message)))
}

pub trait BroadcastClient: Send + Sync {
    /// Start connecting. A no-op unless the client is offline.
    fn connect(&self);

    /// Queue `message` for its channel and/or client target.
    fn send_message(&self, message: Message) -> Result<()>;

    /// Register `handler` for `channel` and tell the broker about it.
    fn on_message(&self, channel: &str, handler: MessageHandler) -> Result<()>;
}

#[async_trait]
pub trait BroadcastServer: Send + Sync {
    /// Bind the configured target and start accepting connections.
    async fn start(&self) -> Result<()>;

    fn on_message(&self, handler: ClientMessageHandler);

    /// Send a broker-originated message to a channel and/or a client.
    fn send_message(&self, message: Message) -> Result<()>;
}
