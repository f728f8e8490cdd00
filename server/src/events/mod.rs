//! Event router: inbound client events to handlers.
//!
//! Each connection processes its events one at a time in arrival order. A
//! failing handler sends one `error` frame to the caller and nothing else;
//! the connection stays open.

pub mod access;
pub mod bookings;
pub mod chat;
pub mod emergency;
pub mod rides;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::presence::broadcaster::publish_snapshot;
use crate::presence::PresenceStatus;
use crate::state::AppState;
use crate::ws::broadcast::send_to_connection;
use crate::ws::protocol::{decode_inbound, InboundEvent, OutboundEvent, StatusChange};
use crate::ws::ConnectionSender;

/// Identity and outbound channel of the connection an event arrived on.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub user_id: String,
    pub connection_id: String,
    pub display_name: String,
    pub tx: ConnectionSender,
    /// Shared with the heartbeat task.
    pub alive: Arc<AtomicBool>,
}

impl ConnectionContext {
    /// Send an event to this connection only.
    pub fn reply(&self, event: &OutboundEvent) {
        send_to_connection(&self.tx, event);
    }

    /// Heartbeat reply (pong frame or `pong` event).
    pub fn heartbeat_reply(&self, state: &AppState) {
        self.alive.store(true, Ordering::Release);
        state.sessions.record_pong(&self.user_id, &self.connection_id);
    }
}

/// Decode and handle one text frame.
pub async fn handle_text(state: &AppState, ctx: &ConnectionContext, text: &str) {
    let event = match decode_inbound(text) {
        Ok(event) => event,
        Err(err) => {
            report(ctx, "unknown", &err);
            return;
        }
    };

    let name = event.name();
    if let Err(err) = dispatch(state, ctx, event).await {
        report(ctx, name, &err);
    }
}

/// Route a decoded event to its handler.
pub async fn dispatch(
    state: &AppState,
    ctx: &ConnectionContext,
    event: InboundEvent,
) -> CoreResult<()> {
    match event {
        InboundEvent::JoinRide(r) => rides::join_ride(state, ctx, r).await,
        InboundEvent::LeaveRide(r) => rides::leave_ride(state, ctx, r),
        InboundEvent::UpdateLocation(u) => rides::update_location(state, ctx, u).await,
        InboundEvent::UpdateRideStatus(c) => rides::update_ride_status(state, ctx, c).await,
        InboundEvent::UpdateBookingStatus(c) => {
            bookings::update_booking_status(state, ctx, c).await
        }
        InboundEvent::SendMessage(m) => chat::send_message(state, ctx, m).await,
        InboundEvent::MarkMessageRead(m) => chat::mark_message_read(state, ctx, m).await,
        InboundEvent::TypingStart(r) => chat::typing(state, ctx, r, true),
        InboundEvent::TypingStop(r) => chat::typing(state, ctx, r, false),
        InboundEvent::EmergencyAlert(report) => emergency::raise(state, ctx, report).await,
        InboundEvent::UpdateStatus(change) => update_status(state, ctx, change),
        InboundEvent::Pong(_) => {
            ctx.heartbeat_reply(state);
            Ok(())
        }
    }
}

/// Log a failed event by kind and tell the caller.
fn report(ctx: &ConnectionContext, event: &str, err: &CoreError) {
    match err {
        CoreError::TransientDependencyFailure(_) => {
            tracing::error!(user_id = %ctx.user_id, event, error = %err, "Event handler failed");
        }
        CoreError::Unauthorized(_) | CoreError::Unauthenticated(_) => {
            tracing::warn!(user_id = %ctx.user_id, event, error = %err, "Event rejected");
        }
        CoreError::NotFound(_) | CoreError::ProtocolViolation(_) => {
            tracing::debug!(user_id = %ctx.user_id, event, error = %err, "Event rejected");
        }
    }
    ctx.reply(&OutboundEvent::error(err.client_message()));
}

/// Explicit presence change (`update_status`).
fn update_status(state: &AppState, ctx: &ConnectionContext, change: StatusChange) -> CoreResult<()> {
    let status = PresenceStatus::parse_settable(change.status.trim())
        .ok_or_else(|| CoreError::protocol(format!("Unknown status '{}'", change.status)))?;

    if !state.sessions.set_status(&ctx.user_id, status) {
        return Err(CoreError::not_found("Session not found"));
    }

    tracing::info!(user_id = %ctx.user_id, status = status.as_str(), "Presence status changed");
    publish_snapshot(state);
    Ok(())
}
