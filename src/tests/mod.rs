//! End-to-end tests over real sockets: a broker plus library clients.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::broker::Broker;
use crate::config::{ConnectionSettings, Settings};
use crate::message::Message;
use crate::transport::message_handler;
use crate::{BroadcastClient, BroadcastServer, TcpBroadcastClient, TcpBroadcastServer};

async fn start_server(connection: ConnectionSettings) -> (TcpBroadcastServer, Settings) {
    let server = TcpBroadcastServer::new(&Settings::with_connection(connection)).unwrap();
    server.start().await.unwrap();

    let address = server.local_address().unwrap();
    let connection = match address.strip_prefix("unix:") {
        Some(path) => ConnectionSettings::from_url(path),
        None => {
            let port = address.rsplit(':').next().unwrap().parse().unwrap();
            ConnectionSettings::from_host_port("127.0.0.1", port)
        }
    };
    let mut settings = Settings::with_connection(connection);
    settings.client.reconnect_delay_ms = 100;
    (server, settings)
}

fn listen(
    client: &TcpBroadcastClient,
    channel: &str,
) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .on_message(
            channel,
            message_handler(move |message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            }),
        )
        .unwrap();
    rx
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("handler dropped")
}

async fn wait_for(broker: &Arc<Mutex<Broker>>, check: impl Fn(&Broker) -> bool) {
    for _ in 0..300 {
        if check(&broker.lock().unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("broker never reached the expected state");
}

fn subscribers(broker: &Broker, channel: &str) -> usize {
    broker
        .channels
        .get(channel)
        .map_or(0, |c| c.subscribers.len())
}

#[tokio::test]
async fn late_subscriber_receives_stashed_message() {
    let (server, settings) =
        start_server(ConnectionSettings::from_host_port("127.0.0.1", 0)).await;
    let broker = server.broker();

    let publisher = TcpBroadcastClient::with_name(&settings, "publisher").unwrap();
    publisher
        .send_message(Message::channel_message("orders", json!({"order": 1})).with_name("created"))
        .unwrap();
    publisher.connect();

    wait_for(&broker, |b| b.stash.len(Some("orders")) == 1).await;

    let subscriber = TcpBroadcastClient::with_name(&settings, "subscriber").unwrap();
    let mut orders = listen(&subscriber, "orders");
    subscriber.connect();

    let received = recv(&mut orders).await;
    assert_eq!(received.data, json!({"order": 1}));
    assert_eq!(received.name.as_deref(), Some("created"));
    assert!(broker.lock().unwrap().stash.is_empty());

    // replayed once only
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orders.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_reaches_other_subscribers_only() {
    let (server, settings) =
        start_server(ConnectionSettings::from_host_port("127.0.0.1", 0)).await;
    let broker = server.broker();

    let alice = TcpBroadcastClient::with_name(&settings, "alice").unwrap();
    let bob = TcpBroadcastClient::with_name(&settings, "bob").unwrap();
    let mut alice_chat = listen(&alice, "chat");
    let mut bob_chat = listen(&bob, "chat");
    alice.connect();
    bob.connect();
    wait_for(&broker, |b| subscribers(b, "chat") == 2).await;

    alice
        .send_message(Message::channel_message("chat", json!("hello bob")))
        .unwrap();

    assert_eq!(recv(&mut bob_chat).await.data, json!("hello bob"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alice_chat.try_recv().is_err());
    assert!(broker.lock().unwrap().stash.is_empty());
}

#[tokio::test]
async fn direct_message_by_name_and_server_broadcast() {
    let (server, settings) =
        start_server(ConnectionSettings::from_host_port("127.0.0.1", 0)).await;
    let broker = server.broker();

    let worker = TcpBroadcastClient::with_name(&settings, "worker").unwrap();
    let mut jobs = listen(&worker, "jobs");
    let (direct_tx, mut direct) = mpsc::unbounded_channel();
    worker.on_direct_message(message_handler(move |message| {
        let direct_tx = direct_tx.clone();
        async move {
            let _ = direct_tx.send(message);
        }
    }));
    worker.connect();

    let boss = TcpBroadcastClient::with_name(&settings, "boss").unwrap();
    boss.connect();
    wait_for(&broker, |b| {
        subscribers(b, "jobs") == 1 && b.find_client("boss").is_some()
    })
    .await;

    boss.send_message(Message::client_message("worker", json!("report in")))
        .unwrap();
    assert_eq!(recv(&mut direct).await.data, json!("report in"));

    server
        .send_message(Message::channel_message("jobs", json!({"job": 9})))
        .unwrap();
    let job = recv(&mut jobs).await;
    assert_eq!(job.data, json!({"job": 9}));
    assert_eq!(job.name.as_deref(), Some("server-channel-message"));
}

#[cfg(unix)]
#[tokio::test]
async fn broadcast_over_local_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broadcast.sock");
    let (server, settings) =
        start_server(ConnectionSettings::from_url(path.to_string_lossy())).await;
    let broker = server.broker();

    let a = TcpBroadcastClient::with_name(&settings, "a").unwrap();
    let b = TcpBroadcastClient::with_name(&settings, "b").unwrap();
    let mut inbox = listen(&b, "local");
    a.connect();
    b.connect();
    wait_for(&broker, |broker| {
        subscribers(broker, "local") == 1 && broker.clients.len() == 2
    })
    .await;

    a.send_message(Message::channel_message("local", json!(true)))
        .unwrap();
    assert_eq!(recv(&mut inbox).await.data, json!(true));
}
