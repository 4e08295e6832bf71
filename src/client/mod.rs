//! Client core: session, topic routing and the shared notification state.

pub mod api;
pub mod hub;
pub mod notifications;
pub mod presence;
pub mod registry;
pub mod session;
pub mod toast;

pub use api::NotificationApi;
pub use hub::{Hub, HubConsumer, HubSnapshot, RetainPolicy};
pub use notifications::NotificationStream;
pub use presence::PresenceTracker;
pub use registry::{DispatchOutcome, SubscriptionRegistry, TopicHandler};
pub use session::Session;
pub use toast::ToastDispatcher;
