//! Gateway Integration Tests
//!
//! Each test runs one or more in-process gateways on ephemeral ports,
//! wired to an in-memory bus and membership store, and talks to them over
//! real WebSocket connections. No external services are needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chat_cache::{BroadcastBus, MemoryHub};
use chat_core::Snowflake;
use chat_gateway::connection::{ConnectionState, Next};
use chat_gateway::protocol::CloseCode;
use integration_tests::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

const QUIET: Duration = Duration::from_millis(300);

async fn presence_of(ws: &mut WsClient, user_id: Snowflake) -> String {
    loop {
        let frame = ws.next_event("PRESENCE_UPDATE").await.unwrap();
        if frame["d"]["user_id"] == user_id.to_string() {
            return frame["d"]["status"].as_str().unwrap().to_string();
        }
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start(Arc::new(MemoryMembershipStore::new()))
        .await
        .expect("Failed to start server");

    let response = server.get("/health").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_stats_counts_connections() {
    let store = Arc::new(MemoryMembershipStore::new());
    let user = unique_id();
    store.join(user, guild(unique_id()));
    let server = TestServer::start(store).await.unwrap();

    let (_ws, _ready) = server.connect_as(user).await.unwrap();

    let response = server.get("/stats").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: Value = response.json().await.unwrap();
    assert_eq!(stats["gateway"]["connections"], 1);
    assert_eq!(stats["gateway"]["users"], 1);
    assert_eq!(stats["gateway"]["topics"], 2);
    assert_eq!(stats["bus"]["connected"], true);
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_hello_then_ready() {
    let store = Arc::new(MemoryMembershipStore::new());
    let user = unique_id();
    let guild_id = unique_id();
    store.join(user, guild(guild_id));
    let server = TestServer::start(store).await.unwrap();

    let mut ws = server.connect().await.unwrap();
    assert_eq!(ws.hello["d"]["heartbeat_interval"], 5_000);

    let ready = ws.identify(&token_for(user)).await.unwrap();
    assert_eq!(ready["s"], 1);
    assert_eq!(ready["d"]["user"]["id"], user.to_string());

    let topics: Vec<&str> = ready["d"]["topics"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(topics.contains(&format!("user:{user}").as_str()));
    assert!(topics.contains(&format!("guild:{guild_id}").as_str()));
}

#[tokio::test]
async fn test_heartbeat_ack_echoes_timestamp() {
    let server = TestServer::start(Arc::new(MemoryMembershipStore::new()))
        .await
        .unwrap();
    let (mut ws, _ready) = server.connect_as(unique_id()).await.unwrap();

    ws.send_json(&heartbeat(1_700_000_000_000)).await.unwrap();
    let ack = ws.next_op(11).await.unwrap();
    assert_eq!(ack["d"]["timestamp"], 1_700_000_000_000_i64);
}

#[tokio::test]
async fn test_invalid_token_closes_with_auth_failed() {
    let server = TestServer::start(Arc::new(MemoryMembershipStore::new()))
        .await
        .unwrap();
    let mut ws = server.connect().await.unwrap();

    ws.send_json(&identify("not-a-token")).await.unwrap();
    assert_eq!(
        ws.expect_close().await.unwrap(),
        CloseCode::AuthenticationFailed.as_u16()
    );
    assert_eq!(server.stats().connections, 0);
}

#[tokio::test]
async fn test_heartbeat_before_identify_closes_not_authenticated() {
    let server = TestServer::start(Arc::new(MemoryMembershipStore::new()))
        .await
        .unwrap();
    let mut ws = server.connect().await.unwrap();

    ws.send_json(&heartbeat(1)).await.unwrap();
    assert_eq!(
        ws.expect_close().await.unwrap(),
        CloseCode::NotAuthenticated.as_u16()
    );
}

#[tokio::test]
async fn test_no_identify_closes_with_policy_violation() {
    let mut config = test_config("gw-identify");
    config.gateway.identify_timeout_ms = 300;
    let server = TestServer::start_with(
        MemoryHub::new(64),
        Arc::new(MemoryMembershipStore::new()),
        config,
    )
    .await
    .unwrap();

    let mut ws = server.connect().await.unwrap();
    assert_eq!(
        ws.expect_close().await.unwrap(),
        CloseCode::PolicyViolation.as_u16()
    );
}

// ============================================================================
// Fanout
// ============================================================================

#[tokio::test]
async fn test_message_delivered_once_to_guild_member() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let (user, outsider) = (unique_id(), unique_id());
    let (guild_id, channel_id) = (unique_id(), unique_id());
    // Subscribed to both topics of the envelope, still one frame
    store.join(user, guild(guild_id));
    store.join(user, channel(channel_id));
    store.join(outsider, guild(unique_id()));
    let server = TestServer::start_with(Arc::clone(&hub), store, test_config("gw-a"))
        .await
        .unwrap();

    let (mut member_ws, _) = server.connect_as(user).await.unwrap();
    let (mut outsider_ws, _) = server.connect_as(outsider).await.unwrap();

    let rest = publisher(&hub);
    rest.publish(message_create(guild_id, channel_id, "hello"))
        .unwrap();

    let frame = member_ws.next_event("MESSAGE_CREATE").await.unwrap();
    assert_eq!(frame["d"]["channel_id"], channel_id.to_string());
    assert_eq!(frame["d"]["content"], "hello");
    assert!(frame["id"].is_string());
    assert!(frame["s"].as_u64().unwrap() > 1);

    member_ws
        .expect_no_event("MESSAGE_CREATE", QUIET)
        .await
        .unwrap();
    outsider_ws
        .expect_no_event("MESSAGE_CREATE", QUIET)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_excluded_user_does_not_receive_event() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let (author, reader) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(author, guild(guild_id));
    store.join(reader, guild(guild_id));
    let server = TestServer::start_with(Arc::clone(&hub), store, test_config("gw-x"))
        .await
        .unwrap();

    let (mut author_ws, _) = server.connect_as(author).await.unwrap();
    let (mut reader_ws, _) = server.connect_as(reader).await.unwrap();

    publisher(&hub)
        .publish(message_create(guild_id, unique_id(), "typed").excluding(author))
        .unwrap();

    reader_ws.next_event("MESSAGE_CREATE").await.unwrap();
    author_ws
        .expect_no_event("MESSAGE_CREATE", QUIET)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_kicked_member_stops_receiving_guild_events() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let (kicked, staying) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(kicked, guild(guild_id));
    store.join(staying, guild(guild_id));
    let server = TestServer::start_with(Arc::clone(&hub), Arc::clone(&store), test_config("gw-k"))
        .await
        .unwrap();

    let (mut kicked_ws, _) = server.connect_as(kicked).await.unwrap();
    let (mut staying_ws, _) = server.connect_as(staying).await.unwrap();

    let rest = publisher(&hub);
    store.leave(kicked, guild(guild_id));
    rest.publish(member_remove(guild_id, kicked)).unwrap();

    // The removed member still sees their own removal
    let removal = kicked_ws.next_event("GUILD_MEMBER_REMOVE").await.unwrap();
    assert_eq!(removal["d"]["user"]["id"], kicked.to_string());
    staying_ws.next_event("GUILD_MEMBER_REMOVE").await.unwrap();

    rest.publish(message_create(guild_id, unique_id(), "after kick"))
        .unwrap();
    staying_ws.next_event("MESSAGE_CREATE").await.unwrap();
    kicked_ws
        .expect_no_event("MESSAGE_CREATE", QUIET)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_resync_picks_up_new_membership() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let user = unique_id();
    let guild_id = unique_id();
    let server = TestServer::start_with(Arc::clone(&hub), Arc::clone(&store), test_config("gw-r"))
        .await
        .unwrap();
    let (mut ws, _) = server.connect_as(user).await.unwrap();
    let before = server.stats().topics;

    store.join(user, guild(guild_id));
    let rest = publisher(&hub);
    rest.publish(subscription_resync(user)).unwrap();
    server.wait_for(|stats| stats.topics == before + 1).await.unwrap();

    rest.publish(message_create(guild_id, unique_id(), "welcome"))
        .unwrap();
    let frame = ws.next_event("MESSAGE_CREATE").await.unwrap();
    assert_eq!(frame["d"]["content"], "welcome");
}

#[tokio::test]
async fn test_slow_consumer_is_evicted_without_stalling_others() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let (slow, fast) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(slow, guild(guild_id));
    store.join(fast, guild(guild_id));
    let server = TestServer::start_with(Arc::clone(&hub), store, test_config("gw-s"))
        .await
        .unwrap();

    // A connection whose writer never drains its queue
    let manager = server.gateway().state().manager();
    let stuck = manager.open();
    manager.identify(&stuck, principal(slow)).await.unwrap();
    let (mut fast_ws, _) = server.connect_as(fast).await.unwrap();

    let rest = publisher(&hub);
    let total = manager.config().outbound_queue_capacity * 2;
    for n in 0..total {
        rest.publish(message_create(guild_id, unique_id(), &format!("m{n}")))
            .unwrap();
    }

    for n in 0..total {
        let frame = fast_ws.next_event("MESSAGE_CREATE").await.unwrap();
        assert_eq!(frame["d"]["content"], format!("m{n}"));
    }

    assert_eq!(stuck.state(), ConnectionState::Closed);
    assert!(matches!(
        stuck.outbound().next().await,
        Next::Close(CloseCode::SlowConsumer)
    ));
    assert_eq!(server.stats().connections, 1);
}

#[tokio::test]
async fn test_silent_client_is_closed_after_missed_heartbeats() {
    let mut config = test_config("gw-hb");
    config.gateway.heartbeat_interval_ms = 200;
    config.gateway.heartbeat_missed_limit = 2;
    let server = TestServer::start_with(
        MemoryHub::new(64),
        Arc::new(MemoryMembershipStore::new()),
        config,
    )
    .await
    .unwrap();

    let (mut ws, _) = server.connect_as(unique_id()).await.unwrap();
    assert_eq!(
        ws.expect_close().await.unwrap(),
        CloseCode::HeartbeatTimeout.as_u16()
    );

    server
        .wait_for(|stats| stats.connections == 0 && stats.subscribed_connections == 0)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_publishers_keep_per_origin_order() {
    let store = Arc::new(MemoryMembershipStore::new());
    let hub = MemoryHub::new(4096);
    let (alice, bob) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(alice, guild(guild_id));
    store.join(bob, guild(guild_id));

    let gw_a = TestServer::start_with(Arc::clone(&hub), Arc::clone(&store), test_config("gw-1"))
        .await
        .unwrap();
    let gw_b = TestServer::start_with(Arc::clone(&hub), Arc::clone(&store), test_config("gw-2"))
        .await
        .unwrap();
    let (mut alice_ws, _) = gw_a.connect_as(alice).await.unwrap();
    let (mut bob_ws, _) = gw_b.connect_as(bob).await.unwrap();

    const PER_ORIGIN: usize = 20;
    let publish_all = |bus: Arc<dyn BroadcastBus>, origin: &'static str| {
        tokio::spawn(async move {
            for n in 0..PER_ORIGIN {
                let mut envelope = message_create(guild_id, unique_id(), "x");
                envelope.data["origin"] = json!(origin);
                envelope.data["n"] = json!(n);
                bus.publish(envelope).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let a = publish_all(Arc::clone(gw_a.bus()), "a");
    let b = publish_all(Arc::clone(gw_b.bus()), "b");
    a.await.unwrap();
    b.await.unwrap();

    for ws in [&mut alice_ws, &mut bob_ws] {
        let mut last: HashMap<String, i64> = HashMap::new();
        for _ in 0..PER_ORIGIN * 2 {
            let frame = ws.next_event("MESSAGE_CREATE").await.unwrap();
            let origin = frame["d"]["origin"].as_str().unwrap().to_string();
            let n = frame["d"]["n"].as_i64().unwrap();
            let previous = last.insert(origin, n).unwrap_or(-1);
            assert_eq!(n, previous + 1, "out of order within one origin");
        }
        assert_eq!(last.len(), 2);
    }
}

// ============================================================================
// Presence
// ============================================================================

#[tokio::test]
async fn test_presence_online_then_offline_after_grace() {
    let store = Arc::new(MemoryMembershipStore::new());
    let (watcher, visitor) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(watcher, guild(guild_id));
    store.join(visitor, guild(guild_id));
    let server = TestServer::start(store).await.unwrap();

    let (mut watcher_ws, _) = server.connect_as(watcher).await.unwrap();
    let (visitor_ws, _) = server.connect_as(visitor).await.unwrap();
    assert_eq!(presence_of(&mut watcher_ws, visitor).await, "online");

    visitor_ws.close().await.unwrap();
    assert_eq!(presence_of(&mut watcher_ws, visitor).await, "offline");
}

#[tokio::test]
async fn test_manual_dnd_is_announced() {
    let store = Arc::new(MemoryMembershipStore::new());
    let (watcher, user) = (unique_id(), unique_id());
    let guild_id = unique_id();
    store.join(watcher, guild(guild_id));
    store.join(user, guild(guild_id));
    let server = TestServer::start(store).await.unwrap();

    let (mut watcher_ws, _) = server.connect_as(watcher).await.unwrap();
    let (mut user_ws, _) = server.connect_as(user).await.unwrap();
    assert_eq!(presence_of(&mut watcher_ws, user).await, "online");

    user_ws
        .send_json(&json!({ "op": 3, "d": { "status": "dnd" } }))
        .await
        .unwrap();
    assert_eq!(presence_of(&mut watcher_ws, user).await, "dnd");

    user_ws
        .send_json(&json!({ "op": 3, "d": { "status": "invisible" } }))
        .await
        .unwrap();
    assert_eq!(presence_of(&mut watcher_ws, user).await, "offline");
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_clients_with_server_shutdown() {
    let server = TestServer::start(Arc::new(MemoryMembershipStore::new()))
        .await
        .unwrap();
    let (mut ws, _) = server.connect_as(unique_id()).await.unwrap();
    assert_eq!(server.gateway().state().sockets().count(), 1);

    // Every socket has flushed its close frame before shutdown returns
    assert_eq!(server.shutdown().await, 0);
    assert_eq!(
        ws.expect_close().await.unwrap(),
        CloseCode::ServerShutdown.as_u16()
    );
}
