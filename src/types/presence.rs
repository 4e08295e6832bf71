use serde::{Deserialize, Serialize};

/// Payload of `/topic/online-count`. Last write wins.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    /// Live sessions on the broker
    pub online_count: u32,
    /// Broker time in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl PresenceSnapshot {
    pub fn new(online_count: u32) -> Self {
        Self {
            online_count,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }
}
