use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::{self, AuthError, RejectReason};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing, invalid or naming no active account
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
/// Identity lookup failed; the client may retry.
const CLOSE_TRY_AGAIN: u16 = 1011;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with appropriate close code,
/// before anything is registered.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match auth::authenticate(&state.db, &state.jwt_secret, params.token.as_deref()).await {
        Ok(profile) => {
            tracing::info!(user_id = %profile.id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, profile))
        }
        Err(err) => {
            let close_code = match &err {
                AuthError::Rejected(RejectReason::Expired) => CLOSE_TOKEN_EXPIRED,
                AuthError::Rejected(_) => CLOSE_TOKEN_INVALID,
                AuthError::Lookup(_) => CLOSE_TRY_AGAIN,
            };
            let reason = match &err {
                AuthError::Rejected(reason) => reason.as_str().to_string(),
                AuthError::Lookup(inner) => inner.client_message(),
            };

            match &err {
                AuthError::Lookup(inner) => {
                    tracing::error!(error = %inner, "WebSocket identity lookup failed")
                }
                AuthError::Rejected(_) => {
                    tracing::warn!(close_code, reason = %reason, "WebSocket auth failed")
                }
            }

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
