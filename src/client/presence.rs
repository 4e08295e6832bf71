use parking_lot::RwLock;

use crate::types::PresenceSnapshot;

/// Latest online count reported by the broker.
#[derive(Default)]
pub struct PresenceTracker {
    latest: RwLock<PresenceSnapshot>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins.
    pub fn apply(&self, snapshot: PresenceSnapshot) {
        *self.latest.write() = snapshot;
    }

    pub fn online_count(&self) -> u32 {
        self.latest.read().online_count
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        *self.latest.read()
    }
}
