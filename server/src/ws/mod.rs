pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod lifecycle;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// One live connection of a user.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: String,
    pub sender: ConnectionSender,
}

/// Connection registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs);
/// together they form that user's personal channel.
/// Arc<DashMap<UserId, Vec<ClientHandle>>>
pub type ConnectionRegistry = Arc<DashMap<String, Vec<ClientHandle>>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
