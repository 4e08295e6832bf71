//! Notification stream: bounded newest-first buffer plus unread counter.

use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::NotificationEvent;

/// How many recent ids are remembered for duplicate suppression.
pub const SEEN_WINDOW: usize = 256;

const ARRIVAL_CHANNEL_CAPACITY: usize = 64;

struct StreamState {
    buffer: VecDeque<NotificationEvent>,
    unread: u64,
    viewing: bool,
    seen_order: VecDeque<i64>,
    seen: HashSet<i64>,
}

impl StreamState {
    /// Record an id; false when it was already in the window. Id 0 means
    /// unassigned and is never treated as a duplicate.
    fn remember(&mut self, id: i64) -> bool {
        if id == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        if self.seen_order.len() > SEEN_WINDOW {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Received notifications, newest first.
pub struct NotificationStream {
    capacity: usize,
    state: RwLock<StreamState>,
    arrivals: broadcast::Sender<NotificationEvent>,
}

impl NotificationStream {
    pub fn new(capacity: usize) -> Self {
        let (arrivals, _) = broadcast::channel(ARRIVAL_CHANNEL_CAPACITY);
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(StreamState {
                buffer: VecDeque::with_capacity(capacity),
                unread: 0,
                viewing: false,
                seen_order: VecDeque::with_capacity(SEEN_WINDOW),
                seen: HashSet::with_capacity(SEEN_WINDOW),
            }),
            arrivals,
        }
    }

    /// Accept a live event. Returns false for a duplicate id, which changes
    /// nothing.
    pub fn ingest(&self, event: NotificationEvent) -> bool {
        {
            let mut state = self.state.write();
            if !state.remember(event.id) {
                debug!("Ignoring duplicate notification {}", event.id);
                return false;
            }

            state.buffer.push_front(event.clone());
            state.buffer.truncate(self.capacity);
            if !state.viewing {
                state.unread += 1;
            }
        }

        // No receivers is fine.
        let _ = self.arrivals.send(event);
        true
    }

    /// Replace the unread counter with the server baseline.
    pub fn apply_baseline(&self, count: u64) {
        self.state.write().unread = count;
    }

    pub fn mark_all_read(&self) {
        self.state.write().unread = 0;
    }

    /// Empty the buffer. The unread counter is left alone.
    pub fn clear(&self) {
        self.state.write().buffer.clear();
    }

    /// While viewing, arrivals do not count as unread.
    pub fn set_viewing(&self, viewing: bool) {
        self.state.write().viewing = viewing;
    }

    /// Newest `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<NotificationEvent> {
        self.state.read().buffer.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().buffer.is_empty()
    }

    pub fn unread_count(&self) -> u64 {
        self.state.read().unread
    }

    /// Subscribe to arrivals of new (non-duplicate) events.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.arrivals.subscribe()
    }
}
