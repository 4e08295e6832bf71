//! STOMP 1.2 text framing shared by the client session and the broker.

pub mod frame;
pub mod heartbeat;

pub use frame::{is_heartbeat, parse_frames, Command, Frame, StompError, HEARTBEAT};
pub use heartbeat::{HeartBeat, Negotiated};

/// Destination carrying `{ onlineCount, timestamp }` presence broadcasts.
pub const ONLINE_COUNT_DESTINATION: &str = "/topic/online-count";

/// Destination carrying site-wide notification events.
pub const NOTIFICATIONS_DESTINATION: &str = "/topic/notifications";

/// Destinations below this prefix are delivered to admin sessions only.
pub const ADMIN_DESTINATION_PREFIX: &str = "/topic/admin/";
