pub mod auth;
pub mod notifications;

pub use auth::{AuthError, TokenService};
pub use notifications::NotificationService;
