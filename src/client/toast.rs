use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{NotificationEvent, ToastItem};

struct ToastEntry {
    item: ToastItem,
    seq: u64,
    timer: Option<JoinHandle<()>>,
}

impl ToastEntry {
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct ToastQueue {
    entries: VecDeque<ToastEntry>,
    next_seq: u64,
}

/// Short-lived popups for incoming notifications, newest first.
pub struct ToastDispatcher {
    capacity: usize,
    ttl: Duration,
    queue: Mutex<ToastQueue>,
    visible_tx: watch::Sender<Vec<ToastItem>>,
}

impl ToastDispatcher {
    pub fn new(capacity: usize, ttl: Duration) -> Arc<Self> {
        let (visible_tx, _) = watch::channel(Vec::new());
        Arc::new(Self {
            capacity: capacity.max(1),
            ttl,
            queue: Mutex::new(ToastQueue {
                entries: VecDeque::new(),
                next_seq: 0,
            }),
            visible_tx,
        })
    }

    /// Turn every arrival into a toast until the stream closes.
    pub async fn run(self: Arc<Self>, mut arrivals: broadcast::Receiver<NotificationEvent>) {
        loop {
            match arrivals.recv().await {
                Ok(event) => self.push(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Toast dispatcher lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Show a toast for `event`, evicting the oldest beyond capacity.
    pub fn push(self: &Arc<Self>, event: &NotificationEvent) {
        let item = ToastItem::from_event(event);
        let id = item.id;
        let deadline = Instant::now() + self.ttl;

        let mut queue = self.queue.lock();
        queue.next_seq += 1;
        let seq = queue.next_seq;

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.expire(id, seq);
            }
        });

        queue.entries.push_front(ToastEntry {
            item,
            seq,
            timer: Some(timer),
        });
        while queue.entries.len() > self.capacity {
            if let Some(mut evicted) = queue.entries.pop_back() {
                evicted.cancel();
            }
        }

        self.publish(&queue);
    }

    /// Remove a toast early. Unknown ids are ignored.
    pub fn dismiss(&self, id: i64) {
        let mut queue = self.queue.lock();
        let before = queue.entries.len();
        queue.entries.retain_mut(|entry| {
            if entry.item.id == id {
                entry.cancel();
                false
            } else {
                true
            }
        });
        if queue.entries.len() != before {
            self.publish(&queue);
        }
    }

    fn expire(&self, id: i64, seq: u64) {
        let mut queue = self.queue.lock();
        let before = queue.entries.len();
        queue
            .entries
            .retain(|entry| !(entry.item.id == id && entry.seq == seq));
        if queue.entries.len() != before {
            debug!("Toast {} expired", id);
            self.publish(&queue);
        }
    }

    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        for entry in queue.entries.iter_mut() {
            entry.cancel();
        }
        queue.entries.clear();
        self.publish(&queue);
    }

    pub fn visible(&self) -> Vec<ToastItem> {
        self.visible_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ToastItem>> {
        self.visible_tx.subscribe()
    }

    fn publish(&self, queue: &ToastQueue) {
        let items = queue.entries.iter().map(|e| e.item.clone()).collect();
        self.visible_tx.send_replace(items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationType;

    fn event(id: i64) -> NotificationEvent {
        NotificationEvent {
            id,
            notification_type: NotificationType::Comment,
            title: "New comment".to_string(),
            content: format!("comment {}", id),
            sender_name: "reader".to_string(),
            related_id: Some(1),
            related_type: Some("article".to_string()),
            is_read: false,
            created_at: chrono::Utc::now().naive_local(),
        }
    }

    fn ids(dispatcher: &ToastDispatcher) -> Vec<i64> {
        dispatcher.visible().iter().map(|t| t.id).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_keeps_newest() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        for id in 1..=4 {
            dispatcher.push(&event(id));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(ids(&dispatcher), vec![4, 3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_ttl() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        dispatcher.push(&event(1));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(ids(&dispatcher), vec![1]);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(dispatcher.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_is_idempotent() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        dispatcher.push(&event(1));
        dispatcher.push(&event(2));

        dispatcher.dismiss(1);
        dispatcher.dismiss(1);
        dispatcher.dismiss(99);
        assert_eq!(ids(&dispatcher), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_keeps_newer_toast_with_same_id() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        dispatcher.push(&event(1));
        tokio::time::sleep(Duration::from_millis(3000)).await;

        dispatcher.dismiss(1);
        dispatcher.push(&event(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ids(&dispatcher), vec![1]);

        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert!(dispatcher.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_consumes_arrivals() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(dispatcher.clone().run(rx));

        let mut visible = dispatcher.subscribe();
        tx.send(event(5)).unwrap();
        visible.changed().await.unwrap();
        assert_eq!(ids(&dispatcher), vec![5]);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_id_uses_arrival_time() {
        let dispatcher = ToastDispatcher::new(3, Duration::from_millis(5000));
        dispatcher.push(&event(0));
        let visible = dispatcher.visible();
        assert_eq!(visible.len(), 1);
        assert_ne!(visible[0].id, 0);
    }
}
