pub mod broker;
pub mod handler;

pub use broker::{Broker, ClientSession};
pub use handler::ws_handler;
