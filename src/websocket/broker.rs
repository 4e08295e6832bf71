use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::stomp::{Command, Frame, ADMIN_DESTINATION_PREFIX, ONLINE_COUNT_DESTINATION};
use crate::types::{PresenceSnapshot, Principal};

/// One connected STOMP session.
pub struct ClientSession {
    /// Channel to the socket writer.
    pub tx: mpsc::UnboundedSender<String>,
    /// Verified identity, `None` for anonymous sessions.
    pub principal: Option<Principal>,
    /// Subscription id -> destination.
    pub subscriptions: HashMap<String, String>,
}

/// Session registry and destination fan-out.
pub struct Broker {
    /// Sessions keyed by session id.
    pub clients: DashMap<Uuid, ClientSession>,
    /// Destination -> (session id, subscription id).
    rooms: DashMap<String, HashSet<(Uuid, String)>>,
    message_seq: AtomicU64,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a session and announce the new online count.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>, principal: Option<Principal>) -> Uuid {
        let client_id = Uuid::new_v4();
        let subject = principal.as_ref().map(|p| p.subject.clone());
        self.clients.insert(
            client_id,
            ClientSession {
                tx,
                principal,
                subscriptions: HashMap::new(),
            },
        );
        info!(
            "STOMP session {} connected ({}), online: {}",
            client_id,
            subject.as_deref().unwrap_or("anonymous"),
            self.online_count()
        );
        self.broadcast_online_count();
        client_id
    }

    /// Remove a session from every destination and announce the new count.
    pub fn unregister(&self, client_id: Uuid) {
        let Some((_, session)) = self.clients.remove(&client_id) else {
            return;
        };
        for (sub_id, destination) in session.subscriptions {
            if let Some(mut room) = self.rooms.get_mut(&destination) {
                room.remove(&(client_id, sub_id));
            }
        }
        info!(
            "STOMP session {} disconnected, online: {}",
            client_id,
            self.online_count()
        );
        self.broadcast_online_count();
    }

    /// Record a subscription. Admin destinations need an admin principal.
    /// Subscribing to the online-count topic delivers the current count
    /// straight away.
    pub fn subscribe(&self, client_id: Uuid, sub_id: &str, destination: &str) -> Result<()> {
        {
            let mut client = self
                .clients
                .get_mut(&client_id)
                .ok_or_else(|| AppError::NotFound(format!("session {}", client_id)))?;

            if destination.starts_with(ADMIN_DESTINATION_PREFIX)
                && !client.principal.as_ref().is_some_and(|p| p.is_admin())
            {
                warn!("Session {} denied subscription to {}", client_id, destination);
                return Err(AppError::Unauthorized(format!(
                    "{} requires an admin session",
                    destination
                )));
            }

            if let Some(previous) = client
                .subscriptions
                .insert(sub_id.to_string(), destination.to_string())
            {
                if let Some(mut room) = self.rooms.get_mut(&previous) {
                    room.remove(&(client_id, sub_id.to_string()));
                }
            }
        }

        self.rooms
            .entry(destination.to_string())
            .or_default()
            .insert((client_id, sub_id.to_string()));
        debug!("Session {} subscribed {} to {}", client_id, sub_id, destination);

        if destination == ONLINE_COUNT_DESTINATION {
            let body = self.online_count_body();
            self.send_to(client_id, &self.message_frame(destination, sub_id, &body));
        }

        Ok(())
    }

    /// Drop a subscription. Returns false when it was unknown.
    pub fn unsubscribe(&self, client_id: Uuid, sub_id: &str) -> bool {
        let destination = self
            .clients
            .get_mut(&client_id)
            .and_then(|mut client| client.subscriptions.remove(sub_id));

        match destination {
            Some(destination) => {
                if let Some(mut room) = self.rooms.get_mut(&destination) {
                    room.remove(&(client_id, sub_id.to_string()));
                }
                debug!("Session {} unsubscribed {}", client_id, sub_id);
                true
            }
            None => false,
        }
    }

    /// Deliver `body` to every subscription on `destination`. Returns the
    /// number of frames queued.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let targets: Vec<(Uuid, String)> = self
            .rooms
            .get(destination)
            .map(|room| room.iter().cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for (client_id, sub_id) in targets {
            let frame = self.message_frame(destination, &sub_id, body);
            if self.send_to(client_id, &frame) {
                delivered += 1;
            }
        }

        debug!("Published to {} ({} subscribers)", destination, delivered);
        delivered
    }

    /// Queue a frame for one session.
    pub fn send_to(&self, client_id: Uuid, frame: &Frame) -> bool {
        match self.clients.get(&client_id) {
            Some(client) => client.tx.send(frame.encode()).is_ok(),
            None => false,
        }
    }

    fn message_frame(&self, destination: &str, sub_id: &str, body: &str) -> Frame {
        let seq = self.message_seq.fetch_add(1, Ordering::Relaxed);
        Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", sub_id)
            .header("message-id", format!("msg-{}", seq))
            .header("content-type", "application/json")
            .body(body)
    }

    fn online_count_body(&self) -> String {
        let snapshot = PresenceSnapshot::new(self.online_count() as u32);
        match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize presence snapshot: {}", e);
                String::from("{}")
            }
        }
    }

    /// Announce the current count on the online-count topic.
    pub fn broadcast_online_count(&self) {
        let body = self.online_count_body();
        self.publish(ONLINE_COUNT_DESTINATION, &body);
    }

    pub fn online_count(&self) -> usize {
        self.clients.len()
    }

    /// Session id -> subject for authenticated sessions.
    pub fn online_users(&self) -> HashMap<String, String> {
        self.clients
            .iter()
            .filter_map(|entry| {
                entry
                    .principal
                    .as_ref()
                    .map(|p| (entry.key().to_string(), p.subject.clone()))
            })
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of live subscriptions on a destination.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.rooms.get(destination).map(|room| room.len()).unwrap_or(0)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            message_seq: AtomicU64::new(0),
        }
    }
}
