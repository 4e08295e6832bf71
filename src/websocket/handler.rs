use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::auth::strip_bearer;
use crate::stomp::{is_heartbeat, parse_frames, Command, Frame, HeartBeat, HEARTBEAT};
use crate::types::Principal;
use crate::AppState;

/// Upper bound on flushing queued frames after the session ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

enum Flow {
    Continue,
    Close,
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.protocols(["v12.stomp", "v11.stomp", "v10.stomp"])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let connect = match tokio::time::timeout(
        state.config.handshake_timeout,
        await_connect(&mut receiver),
    )
    .await
    {
        Ok(Ok(frame)) => frame,
        Ok(Err(reason)) => {
            reject(&mut sender, &reason).await;
            return;
        }
        Err(_) => {
            reject(&mut sender, "no CONNECT frame received").await;
            return;
        }
    };

    let principal = authenticate(&state, &connect);
    let server_hb = HeartBeat::new(state.config.heartbeat_send_ms, state.config.heartbeat_recv_ms);
    let client_hb = match connect.get("heart-beat").map(HeartBeat::parse).transpose() {
        Ok(hb) => hb.unwrap_or_default(),
        Err(e) => {
            reject(&mut sender, &e.to_string()).await;
            return;
        }
    };
    let negotiated = server_hb.negotiate(client_hb);

    let mut connected = Frame::new(Command::Connected)
        .header("version", "1.2")
        .header("heart-beat", server_hb.to_header())
        .header("server", concat!("blogwire/", env!("CARGO_PKG_VERSION")));
    if let Some(principal) = &principal {
        connected = connected.header("user-name", principal.subject.clone());
    }
    if sender.send(Message::Text(connected.encode())).await.is_err() {
        return;
    }

    // Create a channel for sending frames to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.broker.register(tx, principal);

    // Writer: queued frames, plus heart-beats at half the agreed interval.
    let heartbeat_every = negotiated.outgoing.map(|d| (d / 2).max(Duration::from_millis(1)));
    let mut send_task = tokio::spawn(async move {
        let mut ticker = heartbeat_every.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },
                _ = async {
                    match ticker.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if sender.send(Message::Text(HEARTBEAT.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    // Reader: tolerate twice the agreed interval of silence.
    let silence_limit = negotiated.incoming.map(|d| d * 2);
    let mut last_seen = Instant::now();

    loop {
        let deadline = silence_limit.map(|limit| last_seen + limit);
        let idle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = receiver.next() => {
                last_seen = Instant::now();
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Flow::Close = handle_text(&state, client_id, &text) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closing: {}", client_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error for {}: {}", client_id, e);
                        break;
                    }
                }
            }
            _ = idle => {
                warn!("No heart-beat from {} within {:?}, closing", client_id, silence_limit.unwrap_or_default());
                break;
            }
        }
    }

    // Clean up: dropping the session's sender lets the writer drain and close.
    state.broker.unregister(client_id);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!("WebSocket client disconnected: {}", client_id);
}

/// Wait for the opening CONNECT/STOMP frame.
async fn await_connect(receiver: &mut SplitStream<WebSocket>) -> Result<Frame, String> {
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        };
        if is_heartbeat(&text) {
            continue;
        }

        let frame = parse_frames(&text)
            .map_err(|e| e.to_string())?
            .into_iter()
            .next()
            .ok_or_else(|| "empty frame".to_string())?;
        return match frame.command {
            Command::Connect | Command::Stomp => Ok(frame),
            other => Err(format!("expected CONNECT, got {}", other)),
        };
    }
    Err("socket closed before CONNECT".to_string())
}

/// Principal from the CONNECT `Authorization` header. Bad or missing tokens
/// fall back to an anonymous session.
fn authenticate(state: &AppState, connect: &Frame) -> Option<Principal> {
    let header = connect
        .get("Authorization")
        .or_else(|| connect.get("authorization"))?;

    let Some(token) = strip_bearer(header) else {
        warn!("Ignoring non-bearer Authorization header on CONNECT");
        return None;
    };

    match state.tokens.verify(token) {
        Some(principal) => {
            debug!("STOMP CONNECT authenticated as {}", principal.subject);
            Some(principal)
        }
        None => {
            warn!("Invalid token on STOMP CONNECT, continuing anonymously");
            None
        }
    }
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    warn!("Rejecting STOMP handshake: {}", reason);
    let frame = Frame::error("handshake failed", reason);
    let _ = sender.send(Message::Text(frame.encode())).await;
    let _ = sender.close().await;
}

fn handle_text(state: &AppState, client_id: Uuid, text: &str) -> Flow {
    if is_heartbeat(text) {
        return Flow::Continue;
    }

    let frames = match parse_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            send_error(state, client_id, "malformed frame", &e.to_string());
            return Flow::Close;
        }
    };

    for frame in frames {
        if let Flow::Close = handle_frame(state, client_id, &frame) {
            return Flow::Close;
        }
    }
    Flow::Continue
}

fn handle_frame(state: &AppState, client_id: Uuid, frame: &Frame) -> Flow {
    let flow = match frame.command {
        Command::Subscribe => {
            let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
                send_error(state, client_id, "SUBSCRIBE requires id and destination", "");
                return Flow::Close;
            };
            match state.broker.subscribe(client_id, id, destination) {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    send_error(state, client_id, "subscription denied", &e.to_string());
                    return Flow::Close;
                }
            }
        }
        Command::Unsubscribe => {
            if let Some(id) = frame.get("id") {
                state.broker.unsubscribe(client_id, id);
            }
            Flow::Continue
        }
        Command::Disconnect => {
            debug!("Client {} sent DISCONNECT", client_id);
            Flow::Close
        }
        Command::Connect | Command::Stomp => {
            debug!("Ignoring repeated CONNECT from {}", client_id);
            Flow::Continue
        }
        other => {
            debug!("Ignoring {} from {}", other, client_id);
            Flow::Continue
        }
    };

    if let Some(receipt) = frame.get("receipt") {
        let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
        state.broker.send_to(client_id, &reply);
    }

    flow
}

fn send_error(state: &AppState, client_id: Uuid, message: &str, details: &str) {
    warn!("STOMP error for {}: {} {}", client_id, message, details);
    state
        .broker
        .send_to(client_id, &Frame::error(message, details));
}
