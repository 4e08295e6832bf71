use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::stomp::{Command, Frame};
use crate::types::{Topic, TopicEvent};

/// Callback invoked with every decoded event of a topic.
pub type TopicHandler = Arc<dyn Fn(TopicEvent) + Send + Sync>;

/// What happened to a MESSAGE frame handed to [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    DecodeFailed,
    Unrouted,
}

struct Route {
    topic: Topic,
    handler: TopicHandler,
}

/// Topic routes plus the subscription ids live on the current connection.
///
/// Routes are registered once; ids are reissued on every entry into
/// `connected` and forgotten when the connection ends.
pub struct SubscriptionRegistry {
    routes: RwLock<Vec<Route>>,
    /// Subscription id -> route index, current connection only.
    active: Mutex<HashMap<String, usize>>,
    epoch: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a route. Takes effect from the next `connected` transition.
    pub fn register(&self, topic: Topic, handler: TopicHandler) {
        debug!("Registered handler for {}", topic);
        self.routes.write().push(Route { topic, handler });
    }

    /// Drop ids from the previous connection and build one SUBSCRIBE frame per
    /// route with fresh ids.
    pub fn on_enter_connected(&self) -> Vec<Frame> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let routes = self.routes.read();
        let mut active = self.active.lock();
        active.clear();

        routes
            .iter()
            .enumerate()
            .map(|(index, route)| {
                let id = format!("sub-{}-{}", epoch, index);
                active.insert(id.clone(), index);
                Frame::new(Command::Subscribe)
                    .header("id", id)
                    .header("destination", route.topic.destination())
                    .header("ack", "auto")
            })
            .collect()
    }

    /// Forget the ids of a connection that has ended.
    pub fn invalidate(&self) {
        self.active.lock().clear();
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route a MESSAGE to its handler. Decode failures are logged and stop
    /// here; the handler never sees them.
    pub fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        if frame.command != Command::Message {
            return DispatchOutcome::Unrouted;
        }

        let Some((topic, handler)) = self.resolve(frame) else {
            debug!(
                "No route for MESSAGE on {:?}",
                frame.get("destination").unwrap_or("?")
            );
            return DispatchOutcome::Unrouted;
        };

        match topic.decode(&frame.body) {
            Ok(event) => {
                handler(event);
                DispatchOutcome::Delivered
            }
            Err(e) => {
                warn!("Dropping undecodable frame on {}: {}", topic, e);
                DispatchOutcome::DecodeFailed
            }
        }
    }

    fn resolve(&self, frame: &Frame) -> Option<(Topic, TopicHandler)> {
        let routes = self.routes.read();

        let by_id = frame
            .get("subscription")
            .and_then(|id| self.active.lock().get(id).copied());

        let index = by_id.or_else(|| {
            let topic = Topic::from_destination(frame.get("destination")?)?;
            routes.iter().position(|route| route.topic == topic)
        })?;

        routes
            .get(index)
            .map(|route| (route.topic, route.handler.clone()))
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            active: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PresenceSnapshot;

    fn counting_registry() -> (Arc<SubscriptionRegistry>, Arc<Mutex<Vec<TopicEvent>>>) {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.register(
            Topic::OnlineCount,
            Arc::new(move |event| sink.lock().push(event)),
        );
        (registry, seen)
    }

    fn message(subscription: &str, destination: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", destination)
            .body(body)
    }

    #[test]
    fn test_fresh_ids_per_connection() {
        let (registry, _) = counting_registry();

        let first = registry.on_enter_connected();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].get("id"), Some("sub-1-0"));
        assert_eq!(first[0].get("destination"), Some("/topic/online-count"));

        registry.invalidate();
        assert!(registry.active_ids().is_empty());

        let second = registry.on_enter_connected();
        assert_eq!(second[0].get("id"), Some("sub-2-0"));
        assert_eq!(registry.active_ids(), vec!["sub-2-0".to_string()]);
    }

    #[test]
    fn test_dispatch_delivers_decoded_event() {
        let (registry, seen) = counting_registry();
        registry.on_enter_connected();

        let outcome = registry.dispatch(&message("sub-1-0", "/topic/online-count", r#"{"onlineCount":3}"#));
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(
            seen.lock().as_slice(),
            &[TopicEvent::Presence(PresenceSnapshot {
                online_count: 3,
                timestamp: None
            })]
        );
    }

    #[test]
    fn test_decode_failure_is_isolated() {
        let (registry, seen) = counting_registry();
        registry.on_enter_connected();

        let outcome = registry.dispatch(&message("sub-1-0", "/topic/online-count", "{broken"));
        assert_eq!(outcome, DispatchOutcome::DecodeFailed);
        assert!(seen.lock().is_empty());

        let outcome = registry.dispatch(&message("sub-1-0", "/topic/online-count", r#"{"onlineCount":1}"#));
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_falls_back_to_destination() {
        let (registry, seen) = counting_registry();

        let outcome = registry.dispatch(&message("stale", "/topic/online-count", r#"{"onlineCount":2}"#));
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_unrouted() {
        let (registry, _) = counting_registry();
        assert_eq!(
            registry.dispatch(&message("x", "/topic/notifications", "{}")),
            DispatchOutcome::Unrouted
        );
        assert_eq!(
            registry.dispatch(&Frame::new(Command::Receipt)),
            DispatchOutcome::Unrouted
        );
    }
}
