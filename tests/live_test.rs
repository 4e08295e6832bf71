//! End-to-end tests: in-process broker, real sockets, the client hub on top

use blogwire::client::RetainPolicy;
use blogwire::config::{ClientConfig, ServerConfig};
use blogwire::stomp::{parse_frames, Command, Frame};
use blogwire::types::Role;
use blogwire::{AppState, Hub, HubSnapshot};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (AppState, SocketAddr) {
    let config = ServerConfig {
        token_secret: "live-test-secret".to_string(),
        ..ServerConfig::default()
    };
    let state = AppState::new(config).unwrap();
    let app = blogwire::app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, addr)
}

fn client_config(addr: SocketAddr, token: Option<String>) -> ClientConfig {
    ClientConfig {
        ws_url: format!("ws://{}/ws", addr),
        api_url: Some(format!("http://{}", addr)),
        token,
        reconnect_delay: Duration::from_millis(200),
        toast_ttl: Duration::from_secs(30),
        ..ClientConfig::default()
    }
}

async fn wait_for(hub: &Hub, predicate: impl Fn(&HubSnapshot) -> bool) -> HubSnapshot {
    let mut rx = hub.subscribe();
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("hub never reached the expected state")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never became true")
}

#[tokio::test]
async fn test_consumers_share_one_session() {
    let (state, addr) = start_server().await;
    let hub = Hub::new(client_config(addr, None));

    let first = hub.attach();
    let second = hub.attach();
    let snapshot = wait_for(&hub, |s| s.connected && s.online_count == 1).await;

    assert_eq!(snapshot.online_count, 1);
    assert_eq!(hub.session().handshakes(), 1);
    assert_eq!(hub.consumer_count(), 2);
    assert_eq!(state.broker.online_count(), 1);

    drop(first);
    drop(second);
    // Application-lifetime hubs outlive their consumers.
    assert!(hub.is_running());
    hub.shutdown();
}

#[tokio::test]
async fn test_presence_follows_other_sessions() {
    let (state, addr) = start_server().await;
    let watcher = Hub::new(client_config(addr, None));
    let _consumer = watcher.attach();
    wait_for(&watcher, |s| s.online_count == 1).await;

    let other = Hub::new(client_config(addr, None));
    let other_consumer = other.attach();
    wait_for(&watcher, |s| s.online_count == 2).await;

    other.shutdown();
    drop(other_consumer);
    wait_for(&watcher, |s| s.online_count == 1).await;
    assert_eq!(state.broker.online_count(), 1);

    watcher.shutdown();
}

#[tokio::test]
async fn test_unread_baseline_then_live_increment() {
    let (state, addr) = start_server().await;
    for i in 0..7 {
        state
            .notifications
            .broadcast_system("Earlier", &format!("notice {}", i), "admin");
    }

    let admin = state.tokens.issue("admin", Role::Admin, Duration::from_secs(60));
    let hub = Hub::new(client_config(addr, Some(admin)));
    let _consumer = hub.attach();

    wait_for(&hub, |s| s.connected && s.unread_count == 7).await;
    // Nothing that happened before the session existed is replayed.
    assert!(hub.snapshot().notifications.is_empty());
    wait_until(|| state.broker.subscriber_count("/topic/notifications") == 1).await;

    let event = state
        .notifications
        .broadcast_system("Hello", "Live notice", "admin");
    let snapshot = wait_for(&hub, |s| s.unread_count == 8).await;

    assert_eq!(snapshot.notifications.len(), 1);
    assert_eq!(snapshot.notifications[0].id, event.id);
    assert_eq!(snapshot.notifications[0].content, "Live notice");

    hub.mark_all_read();
    assert_eq!(hub.snapshot().unread_count, 0);
    hub.shutdown();
}

#[tokio::test]
async fn test_toasts_show_newest_three() {
    let (state, addr) = start_server().await;
    let hub = Hub::new(client_config(addr, None));
    let _consumer = hub.attach();
    wait_for(&hub, |s| s.connected).await;
    wait_until(|| state.broker.subscriber_count("/topic/notifications") == 1).await;

    let ids: Vec<i64> = (0..4)
        .map(|i| {
            state
                .notifications
                .broadcast_system("Burst", &format!("event {}", i), "admin")
                .id
        })
        .collect();

    wait_for(&hub, |s| s.notifications.len() == 4).await;
    let toasts = hub.toasts().clone();
    wait_until(|| toasts.visible().first().map(|t| t.id) == Some(ids[3])).await;

    let visible: Vec<i64> = hub.toasts().visible().iter().map(|t| t.id).collect();
    assert_eq!(visible, vec![ids[3], ids[2], ids[1]]);

    hub.dismiss_toast(ids[2]);
    let visible: Vec<i64> = hub.toasts().visible().iter().map(|t| t.id).collect();
    assert_eq!(visible, vec![ids[3], ids[1]]);

    hub.shutdown();
    assert!(hub.toasts().visible().is_empty());
}

#[tokio::test]
async fn test_last_consumer_policy_disconnects() {
    let (state, addr) = start_server().await;
    let config = ClientConfig {
        retain_policy: RetainPolicy::LastConsumer,
        ..client_config(addr, None)
    };
    let hub: Arc<Hub> = Hub::new(config);

    let consumer = hub.attach();
    wait_for(&hub, |s| s.connected).await;

    drop(consumer);
    assert!(!hub.is_running());
    assert!(!hub.snapshot().connected);
    wait_until(|| state.broker.online_count() == 0).await;

    // A new consumer starts it again.
    let _consumer = hub.attach();
    wait_for(&hub, |s| s.connected).await;
    assert_eq!(hub.session().handshakes(), 2);
    hub.shutdown();
}

// =============================================================================
// Raw STOMP against the broker
// =============================================================================

async fn raw_connect(
    addr: SocketAddr,
    token: Option<&str>,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let mut connect = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", "127.0.0.1")
        .header("heart-beat", "0,0");
    if let Some(token) = token {
        connect = connect.header("Authorization", format!("Bearer {}", token));
    }
    ws.send(Message::Text(connect.encode())).await.unwrap();

    let connected = next_frame(&mut ws).await;
    assert_eq!(connected.command, Command::Connected);
    assert_eq!(connected.get("version"), Some("1.2"));
    ws
}

async fn next_frame<S>(ws: &mut S) -> Frame
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = parse_frames(&text).unwrap().into_iter().next() {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no frame from broker")
}

#[tokio::test]
async fn test_online_count_sent_on_subscribe() {
    let (_state, addr) = start_server().await;
    let mut ws = raw_connect(addr, None).await;

    let subscribe = Frame::new(Command::Subscribe)
        .header("id", "sub-0")
        .header("destination", "/topic/online-count")
        .header("receipt", "r-1");
    ws.send(Message::Text(subscribe.encode())).await.unwrap();

    let message = next_frame(&mut ws).await;
    assert_eq!(message.command, Command::Message);
    assert_eq!(message.get("subscription"), Some("sub-0"));
    assert!(message.body.contains("\"onlineCount\":1"));

    let receipt = next_frame(&mut ws).await;
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(receipt.get("receipt-id"), Some("r-1"));
}

#[tokio::test]
async fn test_admin_destination_requires_admin_session() {
    let (state, addr) = start_server().await;

    let mut anonymous = raw_connect(addr, None).await;
    let subscribe = Frame::new(Command::Subscribe)
        .header("id", "sub-0")
        .header("destination", "/topic/admin/stats");
    anonymous.send(Message::Text(subscribe.encode())).await.unwrap();
    let error = next_frame(&mut anonymous).await;
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.get("message"), Some("subscription denied"));

    let admin_token = state.tokens.issue("root", Role::Admin, Duration::from_secs(60));
    let mut admin = raw_connect(addr, Some(&admin_token)).await;
    let subscribe = Frame::new(Command::Subscribe)
        .header("id", "sub-0")
        .header("destination", "/topic/admin/stats")
        .header("receipt", "ok");
    admin.send(Message::Text(subscribe.encode())).await.unwrap();
    let receipt = next_frame(&mut admin).await;
    assert_eq!(receipt.command, Command::Receipt);
    assert_eq!(state.broker.subscriber_count("/topic/admin/stats"), 1);
}

#[tokio::test]
async fn test_socket_without_connect_is_rejected() {
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let state = AppState::new(config).unwrap();
    let app = blogwire::app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let error = next_frame(&mut ws).await;
    assert_eq!(error.command, Command::Error);
    assert_eq!(error.get("message"), Some("handshake failed"));
}
