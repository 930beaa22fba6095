//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use bunch_core::ids::UserId;
use bunch_core::model::UserRef;
use bunch_proto::close;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use bunch_server::auth::{Identity, StaticTokenVerifier};
use bunch_server::config::ServerConfig;
use bunch_server::server::GatewayServer;
use bunch_server::store::MemoryChatStore;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a test gateway seeded with two members of bunch `b1` (channels
/// `c1` and `c2`) and one outsider. Returns the base WS URL and the server.
async fn boot_server(config: ServerConfig) -> (String, GatewayServer) {
    let verifier = StaticTokenVerifier::new();
    verifier.insert(
        "tok_alice",
        Identity {
            user_id: UserId::from("u_alice"),
            username: "alice".into(),
        },
    );
    verifier.insert(
        "tok_bob",
        Identity {
            user_id: UserId::from("u_bob"),
            username: "bob".into(),
        },
    );
    verifier.insert(
        "tok_mallory",
        Identity {
            user_id: UserId::from("u_mallory"),
            username: "mallory".into(),
        },
    );

    let store = MemoryChatStore::new();
    let bunch = "b1".into();
    store.add_bunch(&bunch);
    store.add_channel(&bunch, &"c1".into());
    store.add_channel(&bunch, &"c2".into());
    store.add_member(
        &bunch,
        &UserRef {
            id: UserId::from("u_alice"),
            username: "alice".into(),
        },
        "owner",
    );
    store.add_member(
        &bunch,
        &UserRef {
            id: UserId::from("u_bob"),
            username: "bob".into(),
        },
        "member",
    );

    let mut server = GatewayServer::new(config, verifier, store);
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

/// Connect with a token and an optional persisted connection ID.
async fn connect(base: &str, token: &str, connection_id: Option<&str>) -> WsStream {
    let url = match connection_id {
        Some(id) => format!("{base}?token={token}&connection_id={id}"),
        None => format!("{base}?token={token}"),
    };
    let (ws, _) = connect_async(&url).await.unwrap();
    ws
}

/// Read the next text frame as JSON, skipping transport pings.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until one matches `frame_type`.
async fn read_until_type(ws: &mut WsStream, frame_type: &str) -> Value {
    loop {
        let msg = read_json(ws).await;
        if msg["type"] == frame_type {
            return msg;
        }
    }
}

/// Read until the server closes the transport; return the close code.
async fn read_until_close(ws: &mut WsStream) -> Option<u16> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline - tokio::time::Instant::now();
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                return frame.map(|f| u16::from(f.code));
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_)) | None) => return None,
            Err(_) => panic!("timeout waiting for close"),
        }
    }
}

async fn subscribe(ws: &mut WsStream, channel: &str) {
    ws.send(Message::text(
        json!({"type": "subscribe", "bunch_id": "b1", "channel_id": channel}).to_string(),
    ))
    .await
    .unwrap();
    let ack = read_until_type(ws, "subscribed").await;
    assert_eq!(ack["channel_id"], channel);
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake + auth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_connection_established_on_connect() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "connection_established");
    assert!(msg["connection_id"].is_string());
    assert!(msg["server_time"].is_number());

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_presented_connection_id_is_echoed() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", Some("conn_persisted_1")).await;

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["connection_id"], "conn_persisted_1");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_missing_token_closes_4001() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let (mut ws, _) = connect_async(&base).await.unwrap();

    let code = read_until_close(&mut ws).await;
    assert_eq!(code, Some(4001));
    assert!(close::is_auth_error(code.unwrap()));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_bad_token_closes_4002() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_wrong", None).await;

    let code = read_until_close(&mut ws).await;
    assert_eq!(code, Some(4002));

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Ping / pong
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ping_gets_pong_with_echoed_timestamp() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text(
        json!({"type": "ping", "timestamp": 1_700_000_000_000i64}).to_string(),
    ))
    .await
    .unwrap();

    let pong = read_until_type(&mut ws, "pong").await;
    assert_eq!(pong["timestamp"], 1_700_000_000_000i64);
    assert!(pong["server_time"].is_number());

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_subscribe_and_unsubscribe_are_acknowledged() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    subscribe(&mut ws, "c1").await;

    // Duplicate subscribe is acknowledged again, not an error
    subscribe(&mut ws, "c1").await;

    ws.send(Message::text(
        json!({"type": "unsubscribe", "bunch_id": "b1", "channel_id": "c1"}).to_string(),
    ))
    .await
    .unwrap();
    let ack = read_until_type(&mut ws, "unsubscribed").await;
    assert_eq!(ack["channel_id"], "c1");

    // Unsubscribing again is still acknowledged
    ws.send(Message::text(
        json!({"type": "unsubscribe", "bunch_id": "b1", "channel_id": "c1"}).to_string(),
    ))
    .await
    .unwrap();
    let ack = read_until_type(&mut ws, "unsubscribed").await;
    assert_eq!(ack["channel_id"], "c1");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_non_member_subscribe_is_denied_but_connection_survives() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_mallory", None).await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text(
        json!({"type": "subscribe", "bunch_id": "b1", "channel_id": "c1"}).to_string(),
    ))
    .await
    .unwrap();
    let err = read_until_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Access denied to channel");

    // Still able to ping afterwards
    ws.send(Message::text(json!({"type": "ping"}).to_string()))
        .await
        .unwrap();
    let pong = read_until_type(&mut ws, "pong").await;
    assert!(pong["server_time"].is_number());

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Message fan-out
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_message_fans_out_to_channel_subscribers() {
    let (base, server) = boot_server(ServerConfig::default()).await;

    let mut alice = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut alice).await;
    subscribe(&mut alice, "c1").await;

    let mut bob = connect(&base, "tok_bob", None).await;
    let _ = read_json(&mut bob).await;
    subscribe(&mut bob, "c1").await;

    alice
        .send(Message::text(
            json!({
                "type": "message.new",
                "bunch_id": "b1",
                "channel_id": "c1",
                "content": "hello channel"
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // Both subscribers receive it, sender included
    let at_bob = read_until_type(&mut bob, "chat.message").await;
    assert_eq!(at_bob["message"]["content"], "hello channel");
    assert_eq!(at_bob["message"]["author"]["user"]["username"], "alice");
    assert_eq!(at_bob["message"]["channel"], "c1");

    let at_alice = read_until_type(&mut alice, "chat.message").await;
    assert_eq!(at_alice["message"]["id"], at_bob["message"]["id"]);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_fanout_is_channel_scoped() {
    let (base, server) = boot_server(ServerConfig::default()).await;

    let mut alice = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut alice).await;
    subscribe(&mut alice, "c1").await;

    // Bob subscribes to a different channel in the same bunch
    let mut bob = connect(&base, "tok_bob", None).await;
    let _ = read_json(&mut bob).await;
    subscribe(&mut bob, "c2").await;

    alice
        .send(Message::text(
            json!({
                "type": "message.new",
                "bunch_id": "b1",
                "channel_id": "c1",
                "content": "c1 only"
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let _ = read_until_type(&mut alice, "chat.message").await;

    // Bob sees nothing on c2
    let nothing = timeout(Duration::from_millis(300), async {
        read_until_type(&mut bob, "chat.message").await
    })
    .await;
    assert!(nothing.is_err(), "bob should not receive c1 traffic");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_messages_arrive_in_publication_order() {
    let (base, server) = boot_server(ServerConfig::default()).await;

    let mut alice = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut alice).await;
    subscribe(&mut alice, "c1").await;

    let mut bob = connect(&base, "tok_bob", None).await;
    let _ = read_json(&mut bob).await;
    subscribe(&mut bob, "c1").await;

    for i in 0..10 {
        alice
            .send(Message::text(
                json!({
                    "type": "message.new",
                    "bunch_id": "b1",
                    "channel_id": "c1",
                    "content": format!("msg_{i}")
                })
                .to_string(),
            ))
            .await
            .unwrap();
    }

    for i in 0..10 {
        let msg = read_until_type(&mut bob, "chat.message").await;
        assert_eq!(
            msg["message"]["content"],
            format!("msg_{i}"),
            "message {i} out of order"
        );
    }

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_message_requires_an_active_subscription() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    // Member of the bunch, but never subscribed to the channel
    ws.send(Message::text(
        json!({"type": "message.new", "bunch_id": "b1", "channel_id": "c1", "content": "early"})
            .to_string(),
    ))
    .await
    .unwrap();
    let err = read_until_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Not subscribed to channel");

    // After subscribing the same send goes through
    subscribe(&mut ws, "c1").await;
    ws.send(Message::text(
        json!({"type": "message.new", "bunch_id": "b1", "channel_id": "c1", "content": "now"})
            .to_string(),
    ))
    .await
    .unwrap();
    let msg = read_until_type(&mut ws, "chat.message").await;
    assert_eq!(msg["message"]["content"], "now");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_empty_message_is_ignored() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;
    subscribe(&mut ws, "c1").await;

    ws.send(Message::text(
        json!({"type": "message.new", "bunch_id": "b1", "channel_id": "c1", "content": "   "})
            .to_string(),
    ))
    .await
    .unwrap();

    let nothing = timeout(Duration::from_millis(300), async {
        read_until_type(&mut ws, "chat.message").await
    })
    .await;
    assert!(nothing.is_err(), "blank content should not fan out");

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Reactions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_reaction_toggle_alternates_new_and_delete() {
    let (base, server) = boot_server(ServerConfig::default()).await;

    let mut alice = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut alice).await;
    subscribe(&mut alice, "c1").await;

    alice
        .send(Message::text(
            json!({
                "type": "message.new",
                "bunch_id": "b1",
                "channel_id": "c1",
                "content": "react to me"
            })
            .to_string(),
        ))
        .await
        .unwrap();
    let msg = read_until_type(&mut alice, "chat.message").await;
    let message_id = msg["message"]["id"].as_str().unwrap().to_string();

    let toggle = json!({
        "type": "reaction.toggle",
        "bunch_id": "b1",
        "channel_id": "c1",
        "message_id": message_id,
        "emoji": "👍"
    })
    .to_string();

    alice.send(Message::text(toggle.clone())).await.unwrap();
    let added = read_until_type(&mut alice, "reaction.new").await;
    assert_eq!(added["reaction"]["emoji"], "👍");
    assert_eq!(added["reaction"]["message_id"], message_id);

    alice.send(Message::text(toggle.clone())).await.unwrap();
    let removed = read_until_type(&mut alice, "reaction.delete").await;
    assert_eq!(removed["reaction"]["id"], added["reaction"]["id"]);

    // Third toggle adds again
    alice.send(Message::text(toggle)).await.unwrap();
    let again = read_until_type(&mut alice, "reaction.new").await;
    assert_eq!(again["reaction"]["emoji"], "👍");

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_reaction_on_unknown_message_is_an_error_frame() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text(
        json!({
            "type": "reaction.toggle",
            "bunch_id": "b1",
            "channel_id": "c1",
            "message_id": "no-such-message",
            "emoji": "👍"
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let err = read_until_type(&mut ws, "error").await;
    assert_eq!(err["message"], "message not found");

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Supersession + protocol errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_reconnect_supersedes_old_transport_with_4006() {
    let (base, server) = boot_server(ServerConfig::default()).await;

    let mut first = connect(&base, "tok_alice", Some("conn_dup")).await;
    let _ = read_json(&mut first).await;
    subscribe(&mut first, "c1").await;

    let mut second = connect(&base, "tok_alice", Some("conn_dup")).await;
    let established = read_json(&mut second).await;
    assert_eq!(established["connection_id"], "conn_dup");

    // The old transport is closed with the supersede code
    let code = read_until_close(&mut first).await;
    assert_eq!(code, Some(4006));

    // The new transport works: re-subscribe and ping
    subscribe(&mut second, "c1").await;
    second
        .send(Message::text(json!({"type": "ping"}).to_string()))
        .await
        .unwrap();
    let pong = read_until_type(&mut second, "pong").await;
    assert!(pong["server_time"].is_number());

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_invalid_json_gets_error_frame_and_connection_survives() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    ws.send(Message::text("not valid json")).await.unwrap();
    let err = read_until_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Invalid message format");

    // Unknown frame types are protocol errors too
    ws.send(Message::text(
        json!({"type": "message.edit", "message_id": "m1"}).to_string(),
    ))
    .await
    .unwrap();
    let err = read_until_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Invalid message format");

    ws.send(Message::text(json!({"type": "ping"}).to_string()))
        .await
        .unwrap();
    let pong = read_until_type(&mut ws, "pong").await;
    assert!(pong["server_time"].is_number());

    server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat + shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_silent_client_is_evicted_with_4000() {
    let config = ServerConfig {
        ping_interval_secs: 1,
        pong_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (base, server) = boot_server(config).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    // Stop polling the socket so transport pings never get ponged
    tokio::time::sleep(Duration::from_secs(4)).await;

    let code = read_until_close(&mut ws).await;
    assert_eq!(code, Some(4000));

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_dead_peer_is_removed_from_the_registry() {
    let config = ServerConfig {
        ping_interval_secs: 1,
        pong_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (base, server) = boot_server(config).await;

    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;
    subscribe(&mut ws, "c1").await;
    assert_eq!(server.state().registry.len().await, 1);

    // Keep the socket open but stop reading it entirely; the peer looks
    // alive at the TCP level yet never answers pings
    std::mem::forget(ws);
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Heartbeat eviction must finish without the peer's cooperation
    assert_eq!(server.state().registry.len().await, 0);
    assert_eq!(server.state().registry.subscriptions().len(), 0);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_graceful_shutdown_closes_clients_normally() {
    let (base, server) = boot_server(ServerConfig::default()).await;
    let mut ws = connect(&base, "tok_alice", None).await;
    let _ = read_json(&mut ws).await;

    server.shutdown().shutdown();

    let code = timeout(Duration::from_secs(3), read_until_close(&mut ws)).await;
    if let Ok(Some(code)) = code {
        assert_eq!(code, 1000);
    }
}
