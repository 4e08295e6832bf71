use std::fmt;

use crate::stomp::{NOTIFICATIONS_DESTINATION, ONLINE_COUNT_DESTINATION};

use super::{NotificationEvent, PresenceSnapshot};

/// Typed broker destination the client subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    OnlineCount,
    Notifications,
}

/// A decoded MESSAGE body, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    Presence(PresenceSnapshot),
    Notification(NotificationEvent),
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::OnlineCount, Topic::Notifications];

    pub fn destination(&self) -> &'static str {
        match self {
            Topic::OnlineCount => ONLINE_COUNT_DESTINATION,
            Topic::Notifications => NOTIFICATIONS_DESTINATION,
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.destination() == destination)
    }

    /// Decode a MESSAGE body for this topic.
    pub fn decode(&self, body: &str) -> Result<TopicEvent, serde_json::Error> {
        match self {
            Topic::OnlineCount => serde_json::from_str(body).map(TopicEvent::Presence),
            Topic::Notifications => serde_json::from_str(body).map(TopicEvent::Notification),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.destination())
    }
}
