//! Notification types shared by the broker, the REST API and the client stream.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;

/// Notification type categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    System,
    Comment,
    Like,
    /// Any category this build does not know about yet.
    #[serde(other)]
    Unknown,
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::System => "SYSTEM",
            NotificationType::Comment => "COMMENT",
            NotificationType::Like => "LIKE",
            NotificationType::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for NotificationType {
    type Err = Infallible;

    /// Case-insensitive; unrecognised names map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "SYSTEM" => NotificationType::System,
            "COMMENT" => NotificationType::Comment,
            "LIKE" => NotificationType::Like,
            _ => NotificationType::Unknown,
        })
    }
}

/// A notification as published on `/topic/notifications` and returned by the
/// admin API. Receivers treat it as immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Server-assigned identifier
    pub id: i64,
    /// Notification category
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// Short title
    pub title: String,
    /// Body text
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Display name of whoever triggered it
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender_name: String,
    /// Related resource id (article, comment)
    #[serde(default)]
    pub related_id: Option<i64>,
    /// Related resource kind ("article", "comment")
    #[serde(default)]
    pub related_type: Option<String>,
    /// Server-side read flag at publish time
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_read: bool,
    /// Creation time (server local time)
    pub created_at: NaiveDateTime,
}

/// Accept `null` wherever a plain value with a sensible default is expected.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One page of the admin notification list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    /// Notifications on this page, newest first
    pub content: Vec<NotificationEvent>,
    /// Total retained notifications
    pub total_elements: usize,
    /// Number of pages at the requested size
    pub total_pages: usize,
    /// Zero-based page number
    pub number: usize,
}

/// Query parameters for listing notifications.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    /// Page number (0-indexed, default 0)
    pub page: Option<usize>,
    /// Page size (default 20, max 100)
    pub size: Option<usize>,
}

/// Body of `POST /api/admin/notifications/broadcast`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Unread baseline as served by the admin API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: u64,
}

/// Result of a read-state mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub success: bool,
    pub affected: usize,
}

/// Broker statistics for the admin console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsStats {
    pub total_notifications: usize,
    pub status: String,
    pub online_count: usize,
    /// Session id to subject, authenticated sessions only
    pub online_users: HashMap<String, String>,
}
