//! Application-lifetime hub: one session, shared read state, many consumers.

use parking_lot::Mutex;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{NotificationApi, NotificationStream, PresenceTracker, Session, SubscriptionRegistry, ToastDispatcher};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::{ConnectionState, NotificationEvent, Topic, TopicEvent};

/// When the hub releases its connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetainPolicy {
    /// Keep the session until `shutdown()`.
    #[default]
    ApplicationLifetime,
    /// Tear down when the last consumer detaches.
    LastConsumer,
}

impl RetainPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "application" | "application-lifetime" => Some(RetainPolicy::ApplicationLifetime),
            "last-consumer" | "last_consumer" => Some(RetainPolicy::LastConsumer),
            _ => None,
        }
    }
}

/// What every consumer sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    pub connection: ConnectionState,
    pub connected: bool,
    pub online_count: u32,
    /// Newest first, at most the configured view size.
    pub notifications: Vec<NotificationEvent>,
    pub unread_count: u64,
}

/// State touched by topic handlers and background tasks.
struct HubState {
    presence: PresenceTracker,
    stream: Arc<NotificationStream>,
    connection: watch::Receiver<ConnectionState>,
    snapshot_tx: watch::Sender<HubSnapshot>,
    view_limit: usize,
}

impl HubState {
    fn republish(&self) {
        let connection = *self.connection.borrow();
        self.snapshot_tx.send_replace(HubSnapshot {
            connection,
            connected: connection.is_connected(),
            online_count: self.presence.online_count(),
            notifications: self.stream.recent(self.view_limit),
            unread_count: self.stream.unread_count(),
        });
    }
}

#[derive(Default)]
struct Lifecycle {
    consumers: usize,
    running: bool,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Hub {
    session: Session,
    state: Arc<HubState>,
    api: Option<Arc<NotificationApi>>,
    toasts: Arc<ToastDispatcher>,
    retain: RetainPolicy,
    lifecycle: Mutex<Lifecycle>,
}

impl Hub {
    /// Build the hub and register its topic routes. Nothing connects until
    /// the first `attach()`.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let registry = SubscriptionRegistry::new();
        let session = Session::new(&config, registry.clone());

        let state = Arc::new(HubState {
            presence: PresenceTracker::new(),
            stream: Arc::new(NotificationStream::new(config.notification_buffer)),
            connection: session.state(),
            snapshot_tx: watch::channel(HubSnapshot::default()).0,
            view_limit: config.notification_view,
        });

        let presence_state = state.clone();
        registry.register(
            Topic::OnlineCount,
            Arc::new(move |event| {
                if let TopicEvent::Presence(snapshot) = event {
                    presence_state.presence.apply(snapshot);
                    presence_state.republish();
                }
            }),
        );

        let notification_state = state.clone();
        registry.register(
            Topic::Notifications,
            Arc::new(move |event| {
                if let TopicEvent::Notification(notification) = event {
                    if notification_state.stream.ingest(notification) {
                        notification_state.republish();
                    }
                }
            }),
        );

        let api = config
            .api_url
            .as_ref()
            .map(|url| Arc::new(NotificationApi::new(url.clone(), config.token.clone())));

        Arc::new(Self {
            session,
            state,
            api,
            toasts: ToastDispatcher::new(config.toast_capacity, config.toast_ttl),
            retain: config.retain_policy,
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Register a consumer. The first one starts the hub.
    pub fn attach(self: &Arc<Self>) -> HubConsumer {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.consumers += 1;
        debug!("Hub consumer attached ({} total)", lifecycle.consumers);
        if !lifecycle.running {
            self.start(&mut lifecycle);
        }

        HubConsumer { hub: self.clone() }
    }

    fn detach(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.consumers = lifecycle.consumers.saturating_sub(1);
        debug!("Hub consumer detached ({} left)", lifecycle.consumers);
        if lifecycle.consumers == 0 && self.retain == RetainPolicy::LastConsumer {
            self.stop(&mut lifecycle);
        }
    }

    /// Disconnect and stop background work (logout). A later `attach()`
    /// starts again on the same session.
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock();
        self.stop(&mut lifecycle);
    }

    fn start(&self, lifecycle: &mut Lifecycle) {
        info!("Starting notification hub");
        lifecycle.running = true;

        let arrivals = self.state.stream.subscribe();
        lifecycle.tasks.push(tokio::spawn(self.toasts.clone().run(arrivals)));

        let forwarder_state = self.state.clone();
        let mut connection = self.session.state();
        lifecycle.tasks.push(tokio::spawn(async move {
            loop {
                forwarder_state.republish();
                if connection.changed().await.is_err() {
                    break;
                }
            }
        }));

        if let Some(api) = self.api.clone() {
            let baseline_state = self.state.clone();
            lifecycle.tasks.push(tokio::spawn(async move {
                match api.unread_count().await {
                    Ok(count) => {
                        baseline_state.stream.apply_baseline(count);
                        baseline_state.republish();
                    }
                    Err(e) => warn!("Failed to fetch unread baseline: {}", e),
                }
            }));
        }

        self.session.connect();
    }

    fn stop(&self, lifecycle: &mut Lifecycle) {
        if !lifecycle.running {
            return;
        }
        info!("Stopping notification hub");
        self.session.disconnect();
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }
        self.toasts.clear();
        lifecycle.running = false;
        self.state.republish();
    }

    pub fn snapshot(&self) -> HubSnapshot {
        self.state.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HubSnapshot> {
        self.state.snapshot_tx.subscribe()
    }

    /// Zero the local unread counter.
    pub fn mark_all_read(&self) {
        self.state.stream.mark_all_read();
        self.state.republish();
    }

    /// Mark everything read on the server, then locally.
    pub async fn mark_all_read_remote(&self) -> Result<()> {
        if let Some(api) = &self.api {
            let response = api.mark_all_read().await?;
            debug!("Server marked {} notifications read", response.affected);
        }
        self.mark_all_read();
        Ok(())
    }

    pub fn clear_notifications(&self) {
        self.state.stream.clear();
        self.state.republish();
    }

    /// While the list is open, arrivals do not count as unread.
    pub fn set_viewing(&self, viewing: bool) {
        self.state.stream.set_viewing(viewing);
    }

    /// Credential for the next handshake and REST call.
    pub fn set_token(&self, token: Option<String>) {
        if let Some(api) = &self.api {
            api.set_token(token.clone());
        }
        self.session.set_token(token);
    }

    pub fn dismiss_toast(&self, id: i64) {
        self.toasts.dismiss(id);
    }

    pub fn toasts(&self) -> &Arc<ToastDispatcher> {
        &self.toasts
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn notifications(&self) -> &NotificationStream {
        &self.state.stream
    }

    pub fn online_count(&self) -> u32 {
        self.state.presence.online_count()
    }

    pub fn consumer_count(&self) -> usize {
        self.lifecycle.lock().consumers
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }
}

/// A consumer's handle on the hub. Dropping it detaches.
pub struct HubConsumer {
    hub: Arc<Hub>,
}

impl Deref for HubConsumer {
    type Target = Hub;

    fn deref(&self) -> &Hub {
        &self.hub
    }
}

impl Drop for HubConsumer {
    fn drop(&mut self) {
        self.hub.detach();
    }
}
