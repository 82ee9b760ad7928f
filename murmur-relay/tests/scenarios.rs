//! End-to-end scenarios: a relay on a real socket, clients going through the
//! encrypting proxy, and the HTTP key/message APIs.

use murmur_client::config::ProxyConfig;
use murmur_client::crypto::{open_text, KeyPair};
use murmur_client::http::{build_router as proxy_router, ProxyState, PRIVATE_KEY_HEADER};
use murmur_client::ws::connect_upstream;
use murmur_client::{ClientRelayProxy, HttpKeyDirectory};
use murmur_relay::auth::JwtValidator;
use murmur_relay::{Config, RelayServer, SqliteStorage};
use murmur_types::transport::memory::{duplex, MemoryReader, MemoryWriter};
use murmur_types::{
    FrameReader, FrameWriter, MessageFrame, RelayFrame, TransportError, UserId, MESSAGE_SENT_TEXT,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const SECRET: &str = "scenario-secret";
const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

struct Relay {
    server: Arc<RelayServer>,
    url: String,
}

async fn start_relay() -> Relay {
    let storage = SqliteStorage::in_memory().await.unwrap();
    let server = Arc::new(RelayServer::new(Config::with_secret(SECRET), storage));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(
        server
            .clone()
            .serve_with_listener(listener, std::future::pending()),
    );

    Relay { server, url }
}

fn token(user: UserId) -> String {
    JwtValidator::new(SECRET)
        .issue(user, Duration::from_secs(3600))
        .unwrap()
}

fn directory(relay: &Relay, user: UserId) -> HttpKeyDirectory {
    HttpKeyDirectory::new(relay.url.clone(), token(user), Duration::from_secs(5)).unwrap()
}

/// A UI attached to a running proxy session.
struct Ui {
    reader: MemoryReader,
    writer: MemoryWriter,
    task: JoinHandle<Result<(), TransportError>>,
}

async fn attach_ui(relay: &Relay, user: UserId, keys: Option<&KeyPair>) -> Ui {
    let previous = relay.server.registry().lookup(user).map(|h| h.id());

    let upstream = connect_upstream(&relay.url, &token(user)).await.unwrap();
    let mut proxy = ClientRelayProxy::new(Arc::new(directory(relay, user)));
    if let Some(keys) = keys {
        proxy = proxy.with_private_key(keys.private.clone());
    }

    let (ui, proxy_side) = duplex(32);
    let task = tokio::spawn(proxy.run(proxy_side.split(), upstream));

    for _ in 0..400 {
        let current = relay.server.registry().lookup(user).map(|h| h.id());
        if current.is_some() && current != previous {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (reader, writer) = ui.split();
    Ui {
        reader,
        writer,
        task,
    }
}

async fn next_frame(reader: &mut MemoryReader) -> Option<RelayFrame> {
    tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .expect("timed out waiting for frame")
        .expect("transport error")
}

fn message_to(receiver: UserId, content: &str) -> RelayFrame {
    RelayFrame::Message(MessageFrame {
        receiver_id: Some(receiver),
        content: Some(content.into()),
        ..Default::default()
    })
}

async fn get_json(relay: &Relay, user: UserId, path: &str) -> serde_json::Value {
    reqwest::Client::new()
        .get(format!("{}{}", relay.url, path))
        .bearer_auth(token(user))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn offline_receiver_reads_and_decrypts_later() {
    let relay = start_relay().await;
    let bob = KeyPair::generate().unwrap();
    directory(&relay, BOB).publish(&bob.public).await.unwrap();

    let mut alice_ui = attach_ui(&relay, ALICE, None).await;
    alice_ui
        .writer
        .write_frame(&message_to(BOB, "hello"))
        .await
        .unwrap();

    match next_frame(&mut alice_ui.reader).await {
        Some(RelayFrame::MessageSent(ack)) => {
            assert!(ack.message_id.is_some());
            assert_eq!(ack.content.as_deref(), Some(MESSAGE_SENT_TEXT));
        }
        other => panic!("expected message_sent, got {:?}", other),
    }

    // Bob was never online: the message is only in durable storage.
    let unread = get_json(&relay, BOB, "/api/messages/unread").await;
    let messages = unread["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender_id"], 1);

    let envelope = messages[0]["content"].as_str().unwrap();
    assert_ne!(envelope, "hello");
    assert_eq!(open_text(&bob.private, envelope).unwrap(), "hello");
}

#[tokio::test]
async fn online_receiver_gets_live_push_in_plaintext() {
    let relay = start_relay().await;
    let bob = KeyPair::generate().unwrap();
    directory(&relay, BOB).publish(&bob.public).await.unwrap();

    let mut bob_ui = attach_ui(&relay, BOB, Some(&bob)).await;
    let mut alice_ui = attach_ui(&relay, ALICE, None).await;

    alice_ui
        .writer
        .write_frame(&message_to(BOB, "hello bob"))
        .await
        .unwrap();

    match next_frame(&mut bob_ui.reader).await {
        Some(RelayFrame::Message(m)) => {
            assert_eq!(m.content_str(), "hello bob");
            assert_eq!(m.sender_id, Some(ALICE));
            assert_eq!(m.receiver_id, Some(BOB));
            assert!(m.message_id.is_some());
            assert!(m.timestamp.is_some());
        }
        other => panic!("expected message, got {:?}", other),
    }
    assert!(matches!(
        next_frame(&mut alice_ui.reader).await,
        Some(RelayFrame::MessageSent(_))
    ));

    // Live delivery does not mark the message read.
    let unread = get_json(&relay, BOB, "/api/messages/unread").await;
    assert_eq!(unread["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_receiver_key_is_reported_to_sender() {
    let relay = start_relay().await;
    let mut alice_ui = attach_ui(&relay, ALICE, None).await;

    alice_ui
        .writer
        .write_frame(&message_to(BOB, "anyone there?"))
        .await
        .unwrap();

    assert_eq!(
        next_frame(&mut alice_ui.reader).await,
        Some(RelayFrame::error("Failed to get receiver's public key"))
    );
    let unread = get_json(&relay, BOB, "/api/messages/unread").await;
    assert_eq!(unread["messages"], serde_json::json!([]));
}

#[tokio::test]
async fn presence_tracks_connections() {
    let relay = start_relay().await;

    let alice_ui = attach_ui(&relay, ALICE, None).await;
    let _bob_ui = attach_ui(&relay, BOB, None).await;

    let online = get_json(&relay, ALICE, "/api/users/online").await;
    assert_eq!(online["online_users"], serde_json::json!([1, 2]));

    let Ui {
        mut writer, task, ..
    } = alice_ui;
    writer.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    for _ in 0..400 {
        if relay.server.registry().lookup(ALICE).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let online = get_json(&relay, BOB, "/api/users/online").await;
    assert_eq!(online["online_users"], serde_json::json!([2]));
}

#[tokio::test]
async fn reconnect_replaces_previous_connection() {
    let relay = start_relay().await;

    let mut first = attach_ui(&relay, ALICE, None).await;
    let _second = attach_ui(&relay, ALICE, None).await;

    // The evicted session is closed by the relay, so the proxy closes the UI.
    assert_eq!(next_frame(&mut first.reader).await, None);
    assert_eq!(relay.server.registry().len(), 1);
}

#[tokio::test]
async fn ping_round_trips_through_proxy() {
    let relay = start_relay().await;
    let mut ui = attach_ui(&relay, ALICE, None).await;

    ui.writer.write_frame(&RelayFrame::Ping).await.unwrap();
    assert_eq!(next_frame(&mut ui.reader).await, Some(RelayFrame::Pong));
}

async fn start_proxy(relay: &Relay) -> String {
    let config = ProxyConfig {
        server_url: relay.url.clone(),
        ..ProxyConfig::default()
    };
    let app = proxy_router(Arc::new(ProxyState::new(config).unwrap()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    url
}

#[tokio::test]
async fn proxy_rest_routes_seal_and_open_end_to_end() {
    let relay = start_relay().await;
    let proxy = start_proxy(&relay).await;
    let http = reqwest::Client::new();

    // Bob generates keys through the proxy, which publishes the public half.
    let keys: serde_json::Value = http
        .post(format!("{}/api/keys/generate", proxy))
        .bearer_auth(token(BOB))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    let bob_private = keys["private_key"].as_str().unwrap().to_string();
    let published = get_json(&relay, ALICE, "/api/keys/2").await;
    assert_eq!(published["public_key"], keys["public_key"]);

    let receipt: serde_json::Value = http
        .post(format!("{}/api/messages/send", proxy))
        .bearer_auth(token(ALICE))
        .json(&serde_json::json!({ "receiver_id": 2, "content": "over rest" }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(receipt["status"], "sent");

    // The relay holds only the envelope.
    let stored = get_json(&relay, BOB, "/api/messages/unread").await;
    assert_ne!(stored["messages"][0]["content"], "over rest");

    let unread: serde_json::Value = http
        .get(format!("{}/api/messages/unread", proxy))
        .bearer_auth(token(BOB))
        .header(PRIVATE_KEY_HEADER, bob_private)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unread["messages"][0]["content"], "over rest");
    assert_eq!(unread["messages"][0]["id"], receipt["message_id"]);
    assert_eq!(unread["messages"][0]["sender_id"], 1);
}
