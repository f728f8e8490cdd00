//! Server-side presence tracking and broadcast.
//!
//! The session directory holds one record per connected user. The broadcaster
//! publishes the online snapshot as `users_online` over WebSocket.

pub mod broadcaster;
pub mod directory;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Busy,
    Away,
    Offline,
}

impl PresenceStatus {
    /// Parse a status a client may set for itself. `offline` is reserved for
    /// the connection lifecycle.
    pub fn parse_settable(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "busy" => Some(Self::Busy),
            "away" => Some(Self::Away),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

/// One user in a presence snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub display_name: String,
    pub profile_image: Option<String>,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

/// GET /api/presence: current online snapshot. Bearer token required.
pub async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
) -> Json<Vec<PresenceEntry>> {
    Json(state.sessions.online_snapshot(state.timings.stale_after))
}
