pub mod auth;
pub mod connection;
pub mod notification;
pub mod presence;
pub mod toast;
pub mod topic;

pub use auth::*;
pub use connection::*;
pub use notification::*;
pub use presence::*;
pub use toast::*;
pub use topic::*;
