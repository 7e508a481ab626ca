//! Browser-facing WebSocket bridge.

mod error;
mod handler;
mod messages;

pub use error::BridgeError;
pub use handler::ws_realtime_handler;
pub use messages::{IncomingMessage, OutgoingMessage};
