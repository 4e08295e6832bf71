//! In-memory notification store that publishes every new notification on
//! `/topic/notifications`.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::stomp::NOTIFICATIONS_DESTINATION;
use crate::types::{NotificationEvent, NotificationPage, NotificationType, WsStats};
use crate::websocket::Broker;

/// Comment excerpts longer than this are cut and suffixed with "...".
const COMMENT_EXCERPT_CHARS: usize = 50;

pub const DEFAULT_BROADCAST_TITLE: &str = "System announcement";
pub const COMMENT_TITLE: &str = "New comment";

pub struct NotificationService {
    broker: Arc<Broker>,
    /// Newest first.
    store: RwLock<VecDeque<NotificationEvent>>,
    next_id: AtomicI64,
    retention: usize,
}

impl NotificationService {
    pub fn new(broker: Arc<Broker>, retention: usize) -> Self {
        Self {
            broker,
            store: RwLock::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
            retention: retention.max(1),
        }
    }

    /// Store and publish a SYSTEM notification.
    pub fn broadcast_system(&self, title: &str, content: &str, sender: &str) -> NotificationEvent {
        let event = self.build(NotificationType::System, title, content, sender, None, None);
        self.store_and_publish(event)
    }

    /// Store and publish a COMMENT notification for an article.
    ///
    /// Called by the blog's comment pipeline, which lives outside this crate;
    /// nothing here creates comments.
    pub fn notify_comment(
        &self,
        commenter: &str,
        article_id: i64,
        article_title: &str,
        comment: &str,
    ) -> NotificationEvent {
        let content = format!(
            "{} commented on \"{}\": {}",
            commenter,
            article_title,
            excerpt(comment)
        );
        let event = self.build(
            NotificationType::Comment,
            COMMENT_TITLE,
            &content,
            commenter,
            Some(article_id),
            Some("article"),
        );
        self.store_and_publish(event)
    }

    fn build(
        &self,
        notification_type: NotificationType,
        title: &str,
        content: &str,
        sender: &str,
        related_id: Option<i64>,
        related_type: Option<&str>,
    ) -> NotificationEvent {
        NotificationEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            notification_type,
            title: title.to_string(),
            content: content.to_string(),
            sender_name: sender.to_string(),
            related_id,
            related_type: related_type.map(str::to_string),
            is_read: false,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    fn store_and_publish(&self, event: NotificationEvent) -> NotificationEvent {
        {
            let mut store = self.store.write();
            store.push_front(event.clone());
            store.truncate(self.retention);
        }

        match serde_json::to_string(&event) {
            Ok(body) => {
                let delivered = self.broker.publish(NOTIFICATIONS_DESTINATION, &body);
                info!(
                    "Published {} notification {} to {} subscribers",
                    event.notification_type.as_str(),
                    event.id,
                    delivered
                );
            }
            Err(e) => error!("Failed to serialize notification {}: {}", event.id, e),
        }

        event
    }

    /// One page of retained notifications, newest first.
    pub fn list(&self, page: usize, size: usize) -> NotificationPage {
        let size = size.clamp(1, 100);
        let store = self.store.read();
        let total_elements = store.len();
        let content = store
            .iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .cloned()
            .collect();

        NotificationPage {
            content,
            total_elements,
            total_pages: (total_elements + size - 1) / size,
            number: page,
        }
    }

    pub fn get(&self, id: i64) -> Option<NotificationEvent> {
        self.store.read().iter().find(|n| n.id == id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.store.read().iter().filter(|n| !n.is_read).count()
    }

    /// Mark one notification read. Returns how many changed (0 or 1).
    pub fn mark_read(&self, id: i64) -> Result<usize> {
        let mut store = self.store.write();
        let notification = store
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| AppError::NotFound(format!("notification {}", id)))?;

        if notification.is_read {
            return Ok(0);
        }
        notification.is_read = true;
        Ok(1)
    }

    /// Mark everything read. Returns how many changed.
    pub fn mark_all_read(&self) -> usize {
        let mut store = self.store.write();
        let mut affected = 0;
        for notification in store.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            affected += 1;
        }
        affected
    }

    pub fn stats(&self) -> WsStats {
        WsStats {
            total_notifications: self.store.read().len(),
            status: "running".to_string(),
            online_count: self.broker.online_count(),
            online_users: self.broker.online_users(),
        }
    }
}

fn excerpt(comment: &str) -> String {
    if comment.chars().count() <= COMMENT_EXCERPT_CHARS {
        return comment.to_string();
    }
    let cut: String = comment.chars().take(COMMENT_EXCERPT_CHARS).collect();
    format!("{}...", cut)
}
