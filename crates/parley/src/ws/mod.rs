//! WebSocket edge: push-mode delivery of the answer stream.
//!
//! One WebSocket connection binds to one session id. The client sends
//! [`WsCommand`]s (`ask_question`, `reset`); the relay's stream signals
//! reach the connection through the [`RelayHub`], which implements the
//! push realization of [`crate::delivery::DeliveryChannel`].

mod handler;
mod hub;
mod types;

pub use handler::ws_handler;
pub use hub::RelayHub;
pub use types::{WsCommand, WsEvent};
