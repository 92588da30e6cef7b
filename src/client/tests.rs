use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{ConnectionState, MessageQueue, TcpBroadcastClient};
use crate::config::{ConnectionSettings, Settings};
use crate::message::{Message, MessageType, SystemMessage, WireMessage};
use crate::transport::codec::{self, FrameBuffer};
use crate::transport::{BroadcastClient, message_handler};
use crate::utils::BroadcastError;

fn data(label: &str) -> WireMessage {
    let message = Message::channel_message("orders", json!(label)).with_name(label);
    WireMessage::channel_data(&message, "orders")
}

fn system(channel: &str) -> WireMessage {
    SystemMessage::ClientAddedMessageHandler {
        channel: channel.to_string(),
    }
    .into_wire("")
    .unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<WireMessage> {
    let mut buffer = FrameBuffer::default();
    while let Ok(frame) = rx.try_recv() {
        buffer.extend(&frame);
    }
    buffer
        .frames()
        .unwrap()
        .iter()
        .map(|payload| WireMessage::from_slice(payload).unwrap())
        .collect()
}

#[test]
fn test_queue_puts_system_frames_first_newest_first() {
    let mut queue = MessageQueue::new();
    queue.add(data("D1")).unwrap();
    queue.add(system("S1")).unwrap();
    queue.add(data("D2")).unwrap();
    queue.add(system("S2")).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    assert_eq!(queue.start("127.0.0.1:5000", tx).unwrap(), 4);

    let order: Vec<String> = drain(&mut rx)
        .into_iter()
        .map(|m| match m.kind {
            MessageType::System => m.data["channel"].as_str().unwrap().to_string(),
            MessageType::Data => m.name.unwrap(),
        })
        .collect();
    assert_eq!(order, ["S2", "S1", "D1", "D2"]);
    assert!(queue.is_empty());
}

#[test]
fn test_queue_stamps_sender_on_every_frame() {
    let mut queue = MessageQueue::new();
    queue.add(system("orders")).unwrap();
    queue.add(data("D1")).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.start("10.0.0.7:41000", tx).unwrap();

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.sender == "10.0.0.7:41000"));
}

#[test]
fn test_queue_holds_messages_until_started() {
    let mut queue = MessageQueue::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.start("a", tx).unwrap();
    queue.stop();

    queue.add(data("D1")).unwrap();
    assert_eq!(queue.len(), 1);
    assert!(rx.try_recv().is_err());

    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.start("b", tx).unwrap();
    queue.add(data("D2")).unwrap();

    let names: Vec<_> = drain(&mut rx).into_iter().filter_map(|m| m.name).collect();
    assert_eq!(names, ["D1", "D2"]);
}

#[test]
fn test_queue_keeps_frame_when_writer_is_closed() {
    let mut queue = MessageQueue::new();
    let (tx, rx) = mpsc::unbounded_channel();
    queue.start("a", tx).unwrap();
    drop(rx);

    let result = queue.add(data("D1"));
    assert!(matches!(result, Err(BroadcastError::Send(_))));
    assert_eq!(queue.len(), 1);

    // stopped: nothing drains until the next start
    queue.add(system("S1")).unwrap();
    assert_eq!(queue.len(), 2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    queue.start("b", tx).unwrap();
    let kinds: Vec<_> = drain(&mut rx).into_iter().map(|m| m.kind).collect();
    assert_eq!(kinds, [MessageType::System, MessageType::Data]);
}

fn settings_for(port: u16) -> Settings {
    let mut settings = Settings::with_connection(ConnectionSettings::from_host_port("127.0.0.1", port));
    settings.client.reconnect_delay_ms = 200;
    settings
}

#[test]
fn test_client_without_target_fails_at_construction() {
    let result = TcpBroadcastClient::new(&Settings::default());
    assert!(matches!(result, Err(BroadcastError::Configuration(_))));
}

#[test]
fn test_client_name_defaults() {
    let mut settings = settings_for(1);
    let generated = TcpBroadcastClient::new(&settings).unwrap();
    assert!(!generated.name().is_empty());
    assert_eq!(generated.state(), ConnectionState::Offline);

    settings.client.name = Some("billing".into());
    assert_eq!(TcpBroadcastClient::new(&settings).unwrap().name(), "billing");
}

#[test]
fn test_send_message_queues_channel_and_client_frames() {
    let client = TcpBroadcastClient::with_name(&settings_for(1), "c").unwrap();

    client
        .send_message(Message::channel_message("orders", json!(1)))
        .unwrap();
    assert_eq!(client.queued(), 1);

    let mut both = Message::channel_message("orders", json!(2));
    both.client = Some("billing".into());
    client.send_message(both).unwrap();
    assert_eq!(client.queued(), 3);

    client
        .send_message(Message::new(None, None, json!(3)))
        .unwrap();
    assert_eq!(client.queued(), 3);
}

#[test]
fn test_handlers_queue_system_notices() {
    let client = TcpBroadcastClient::with_name(&settings_for(1), "c").unwrap();
    client
        .on_message("orders", message_handler(|_| async {}))
        .unwrap();
    assert_eq!(client.queued(), 1);

    client.remove_message_handler("orders").unwrap();
    assert_eq!(client.queued(), 2);

    // nothing registered, nothing to announce
    client.remove_message_handler("orders").unwrap();
    assert_eq!(client.queued(), 2);
}

async fn read_message(stream: &mut TcpStream) -> WireMessage {
    let read = async {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await.unwrap();
        WireMessage::from_slice(&payload).unwrap()
    };
    timeout(Duration::from_secs(2), read)
        .await
        .expect("timed out waiting for a frame")
}

async fn wait_for_state(client: &TcpBroadcastClient, expected: ConnectionState) {
    for _ in 0..200 {
        if client.state() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("client never became {expected:?}");
}

#[tokio::test]
async fn test_online_client_announces_and_dispatches() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpBroadcastClient::with_name(&settings_for(port), "dispatcher").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .on_message(
            "orders",
            message_handler(move |message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            }),
        )
        .unwrap();
    client
        .send_message(Message::channel_message("orders", json!("queued")))
        .unwrap();

    client.connect();
    let (mut server, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let local = server.peer_addr().unwrap().to_string();

    let hello = read_message(&mut server).await;
    assert_eq!(
        SystemMessage::from_wire(&hello).unwrap(),
        SystemMessage::ClientConnected {
            name: "dispatcher".into(),
            channels: vec!["orders".into()],
        }
    );
    assert_eq!(hello.sender, local);

    let added = read_message(&mut server).await;
    assert!(added.is_system());
    let queued = read_message(&mut server).await;
    assert_eq!(queued.data, json!("queued"));
    assert_eq!(queued.sender, local);
    assert_eq!(client.address().as_deref(), Some(local.as_str()));

    let incoming = WireMessage::server_channel_data(
        &Message::channel_message("orders", json!({"n": 1})),
        "orders",
    );
    let ignored = WireMessage::server_channel_data(&Message::channel_message("audit", json!(0)), "audit");
    let mut frames = Vec::new();
    frames.extend_from_slice(&codec::encode(&ignored).unwrap());
    frames.extend_from_slice(&codec::encode(&incoming).unwrap());
    server.write_all(&frames).await.unwrap();

    let received = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, incoming.id);
    assert_eq!(received.data, json!({"n": 1}));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_reconnects_exactly_once_per_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpBroadcastClient::with_name(&settings_for(port), "reconnector").unwrap();

    client.connect();
    client.connect();
    let (first, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    wait_for_state(&client, ConnectionState::Online).await;
    assert_eq!(client.connect_attempts(), 1);

    drop(first);
    wait_for_state(&client, ConnectionState::Offline).await;

    // A manual connect inside the delay makes the scheduled one a no-op.
    client.connect();
    let (_second, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    wait_for_state(&client, ConnectionState::Online).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.connect_attempts(), 2);
    assert!(
        timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_reconnects_after_delay_when_server_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpBroadcastClient::with_name(&settings_for(port), "retry").unwrap();

    client.connect();
    let (first, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    drop(first);

    let (mut second, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.connect_attempts(), 2);

    let hello = read_message(&mut second).await;
    assert_eq!(hello.name.as_deref(), Some("CLIENT_CONNECTED"));
}
