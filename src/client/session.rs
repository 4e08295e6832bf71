//! Transport session: one STOMP-over-WebSocket connection with a fixed-delay
//! reconnect loop.
//!
//! All transitions and all MESSAGE dispatch happen under the dispatch gate,
//! a mutex around the session generation. `connect()` and `disconnect()` bump
//! the generation, so a task from an older generation can neither change the
//! state nor run a handler once `disconnect()` has returned.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::SubscriptionRegistry;
use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use crate::stomp::{is_heartbeat, parse_frames, Command, Frame, HeartBeat, Negotiated, HEARTBEAT};
use crate::types::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

struct SessionInner {
    ws_url: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    heartbeat: HeartBeat,
    registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    /// Dispatch gate. Holds the current generation.
    gate: Mutex<u64>,
    task: Mutex<Option<JoinHandle<()>>>,
    handshakes: AtomicU64,
    token: RwLock<Option<String>>,
}

/// Handle to the transport session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: &ClientConfig, registry: Arc<SubscriptionRegistry>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let heartbeat = HeartBeat::new(
            config.heartbeat_outgoing.as_millis() as u64,
            config.heartbeat_incoming.as_millis() as u64,
        );

        Self {
            inner: Arc::new(SessionInner {
                ws_url: config.ws_url.clone(),
                reconnect_delay: config.reconnect_delay,
                connect_timeout: config.connect_timeout,
                heartbeat,
                registry,
                state_tx,
                gate: Mutex::new(0),
                task: Mutex::new(None),
                handshakes: AtomicU64::new(0),
                token: RwLock::new(config.token.clone()),
            }),
        }
    }

    /// Start the connection task. No-op while a task is already running
    /// (connecting, connected, or waiting out the reconnect delay).
    pub fn connect(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let generation = {
            let mut current = self.inner.gate.lock();
            *current += 1;
            *current
        };

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run(generation).await }));
    }

    /// Deactivate synchronously. Pending reconnect timers are cancelled and the
    /// socket is dropped; no handler fires after this returns.
    pub fn disconnect(&self) {
        {
            let mut current = self.inner.gate.lock();
            *current += 1;
            self.inner.registry.invalidate();
            self.inner.publish(ConnectionState::Disconnected);
        }

        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
            info!("Broker session disconnected");
        }
    }

    /// Credential for the next handshake.
    pub fn set_token(&self, token: Option<String>) {
        *self.inner.token.write() = token;
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Socket handshakes attempted since creation.
    pub fn handshakes(&self) -> u64 {
        self.inner.handshakes.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }
}

impl SessionInner {
    async fn run(self: Arc<Self>, generation: u64) {
        loop {
            if !self.transition(generation, ConnectionState::Connecting) {
                return;
            }

            match self.run_connection(generation).await {
                Ok(()) => warn!(
                    "Broker connection closed, reconnecting in {:?}",
                    self.reconnect_delay
                ),
                Err(e) => warn!(
                    "Broker connection error: {}, reconnecting in {:?}",
                    e, self.reconnect_delay
                ),
            }

            {
                let current = self.gate.lock();
                if *current != generation {
                    return;
                }
                self.registry.invalidate();
                self.publish(ConnectionState::Disconnected);
            }

            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Change state if `generation` is still current.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let current = self.gate.lock();
        if *current != generation {
            return false;
        }
        self.publish(state);
        true
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host_of(&self.ws_url))
            .header("heart-beat", self.heartbeat.to_header());
        if let Some(token) = self.token.read().as_deref() {
            frame = frame.header("Authorization", format!("Bearer {}", token));
        }
        frame
    }

    async fn handshake(&self) -> Result<(WsWrite, WsRead, Frame)> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(self.connect_frame().encode()))
            .await?;

        let connected = await_connected(&mut read).await?;
        Ok((write, read, connected))
    }

    async fn run_connection(&self, generation: u64) -> Result<()> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        info!("Connecting to broker at {}", self.ws_url);

        let (mut write, mut read, connected) =
            tokio::time::timeout(self.connect_timeout, self.handshake())
                .await
                .map_err(|_| {
                    AppError::Timeout(format!("no CONNECTED within {:?}", self.connect_timeout))
                })??;

        let remote = connected
            .get("heart-beat")
            .map(HeartBeat::parse)
            .transpose()?
            .unwrap_or_default();
        let negotiated = self.heartbeat.negotiate(remote);
        debug!("Negotiated heart-beats: {:?}", negotiated);

        let subscriptions = {
            let current = self.gate.lock();
            if *current != generation {
                return Ok(());
            }
            self.publish(ConnectionState::Connected);
            self.registry.on_enter_connected()
        };
        info!(
            "Connected to broker (server {}), subscribing to {} topics",
            connected.get("server").unwrap_or("unknown"),
            subscriptions.len()
        );

        for frame in subscriptions {
            write.send(Message::Text(frame.encode())).await?;
        }

        self.pump(generation, negotiated, &mut write, &mut read).await
    }

    async fn pump(
        &self,
        generation: u64,
        negotiated: Negotiated,
        write: &mut WsWrite,
        read: &mut WsRead,
    ) -> Result<()> {
        let mut outgoing = negotiated.outgoing.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.handle_text(generation, &text)?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Broker closed the connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            last_seen = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                _ = tick(&mut outgoing) => {
                    write.send(Message::Text(HEARTBEAT.to_string())).await?;
                }
                _ = watchdog(negotiated.incoming, last_seen) => {
                    return Err(AppError::Timeout(format!(
                        "no heart-beat from broker within {:?}",
                        negotiated.incoming.unwrap_or_default()
                    )));
                }
            }
        }
    }

    fn handle_text(&self, generation: u64, text: &str) -> Result<()> {
        if is_heartbeat(text) {
            return Ok(());
        }

        let frames = match parse_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Dropping malformed frame from broker: {}", e);
                return Ok(());
            }
        };

        for frame in frames {
            match frame.command {
                Command::Message => {
                    let current = self.gate.lock();
                    if *current != generation {
                        return Ok(());
                    }
                    self.registry.dispatch(&frame);
                }
                Command::Error => {
                    return Err(AppError::Protocol(
                        frame.get("message").unwrap_or("ERROR frame").to_string(),
                    ));
                }
                Command::Receipt => {
                    debug!("Receipt {}", frame.get("receipt-id").unwrap_or("?"));
                }
                other => debug!("Ignoring unexpected {} frame", other),
            }
        }

        Ok(())
    }
}

/// Read until the broker answers CONNECT.
async fn await_connected(read: &mut WsRead) -> Result<Frame> {
    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        if is_heartbeat(&text) {
            continue;
        }

        let frame = parse_frames(&text)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Protocol("empty reply to CONNECT".to_string()))?;

        return match frame.command {
            Command::Connected => Ok(frame),
            Command::Error => Err(AppError::Protocol(
                frame.get("message").unwrap_or("connect rejected").to_string(),
            )),
            other => Err(AppError::Protocol(format!("expected CONNECTED, got {}", other))),
        };
    }

    Err(AppError::Transport("socket closed during handshake".to_string()))
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watchdog(window: Option<Duration>, last_seen: Instant) {
    match window {
        Some(window) => tokio::time::sleep_until(last_seen + window).await,
        None => std::future::pending().await,
    }
}

/// Host part of a ws:// or wss:// URL, for the CONNECT `host` header.
fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}/ws", addr)
    }

    fn config(ws_url: String) -> ClientConfig {
        ClientConfig {
            ws_url,
            api_url: None,
            reconnect_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("ws://127.0.0.1:8080/ws"), "127.0.0.1");
        assert_eq!(host_of("wss://blog.example.com/ws?x=1"), "blog.example.com");
        assert_eq!(host_of("ws://localhost"), "localhost");
        assert_eq!(host_of("ws://user:pw@blog.example.com/ws"), "blog.example.com");
        assert_eq!(host_of("ws://[::1]:8080/ws"), "[::1]");
        assert_eq!(host_of("not a url"), "localhost");
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let session = Session::new(&config(closed_port_url().await), SubscriptionRegistry::new());
        let mut state = session.state();

        session.connect();
        session.connect();

        tokio::time::timeout(Duration::from_secs(5), async {
            while *state.borrow_and_update() != ConnectionState::Disconnected
                || session.handshakes() == 0
            {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        session.connect();
        assert_eq!(session.handshakes(), 1);
        session.disconnect();
    }

    #[tokio::test]
    async fn test_disconnect_is_synchronous() {
        let session = Session::new(&config(closed_port_url().await), SubscriptionRegistry::new());
        session.connect();
        session.disconnect();

        assert_eq!(session.current_state(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_token_goes_into_connect_frame() {
        let session = Session::new(&config("ws://broker:8080/ws".to_string()), SubscriptionRegistry::new());
        session.set_token(Some("abc".to_string()));

        let frame = session.inner.connect_frame();
        assert_eq!(frame.get("accept-version"), Some("1.2"));
        assert_eq!(frame.get("host"), Some("broker"));
        assert_eq!(frame.get("heart-beat"), Some("10000,10000"));
        assert_eq!(frame.get("Authorization"), Some("Bearer abc"));

        session.set_token(None);
        assert_eq!(session.inner.connect_frame().get("Authorization"), None);
    }
}
