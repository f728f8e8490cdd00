use std::sync::Arc;

use crate::config::{ProximityConfig, Timings};
use crate::db::DbPool;
use crate::presence::directory::SessionDirectory;
use crate::proximity::AlertLedger;
use crate::rooms::RoomRegistry;
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
///
/// Every registry is owned here and injected, so each test server gets its
/// own isolated set.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT verification secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections per user (personal channels)
    pub connections: ConnectionRegistry,
    /// In-memory presence: user_id -> ConnectionRecord
    pub sessions: Arc<SessionDirectory>,
    /// ride_id -> member user ids
    pub rooms: RoomRegistry,
    /// Fired driver-approaching alerts
    pub alerts: Arc<AlertLedger>,
    pub timings: Timings,
    pub proximity: ProximityConfig,
}

impl AppState {
    pub fn new(
        db: DbPool,
        jwt_secret: Vec<u8>,
        timings: Timings,
        proximity: ProximityConfig,
    ) -> Self {
        Self {
            db,
            jwt_secret,
            connections: new_connection_registry(),
            sessions: Arc::new(SessionDirectory::new()),
            rooms: RoomRegistry::new(),
            alerts: Arc::new(AlertLedger::new()),
            timings,
            proximity,
        }
    }

    /// Release all ephemeral state. Pending deferred removals are aborted.
    pub fn shutdown(&self) {
        self.sessions.close();
        self.rooms.close();
        self.alerts.close();
        self.connections.clear();
    }
}
