use serde::Serialize;

use super::{NotificationEvent, NotificationType};

/// Display-only projection of a notification for the transient toast stack.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToastItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    pub sender_name: String,
}

impl ToastItem {
    /// Events without an id (0) are keyed by arrival time instead.
    pub fn from_event(event: &NotificationEvent) -> Self {
        let id = if event.id != 0 {
            event.id
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        Self {
            id,
            notification_type: event.notification_type,
            title: event.title.clone(),
            content: event.content.clone(),
            sender_name: event.sender_name.clone(),
        }
    }
}
