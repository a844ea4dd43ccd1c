//! Realtime transport for the Parley chat core.
//!
//! [`ConnectionManager`] owns the lifecycle of the duplex socket: it
//! connects, replays room membership after reconnects, translates inbound
//! frames into bus events, and exposes the fire-and-forget
//! [`RealtimeLink`] surface the rest of the core sends through.

mod error;
mod link;
mod manager;
mod socket;
pub mod wire;

pub use error::TransportError;
pub use link::RealtimeLink;
pub use manager::ConnectionManager;
pub use socket::{SocketSink, SocketStream, SocketTransport, WebSocketTransport};
