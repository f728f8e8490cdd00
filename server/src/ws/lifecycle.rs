//! Registration and teardown of authenticated connections.

use dashmap::mapref::entry::Entry;

use crate::db::models::UserProfile;
use crate::presence::broadcaster::publish_snapshot;
use crate::state::AppState;
use crate::ws::broadcast::{send_to_connection, send_to_room};
use crate::ws::protocol::{Connected, OutboundEvent, RoomMember};
use crate::ws::{ClientHandle, ConnectionSender};

/// Register a freshly authenticated connection: add it to the user's personal
/// channel, create the session record, greet the client and publish presence.
pub fn register(
    state: &AppState,
    profile: &UserProfile,
    connection_id: &str,
    tx: ConnectionSender,
) {
    let connections = {
        let mut handles = state.connections.entry(profile.id.clone()).or_default();
        handles.push(ClientHandle {
            connection_id: connection_id.to_string(),
            sender: tx.clone(),
        });
        // Under the entry lock, so a concurrent last-connection teardown of
        // the same user is ordered strictly before or after this
        state.sessions.register(profile, connection_id);
        handles.len()
    };

    tracing::debug!(
        user_id = %profile.id,
        connection_id = %connection_id,
        connections,
        "Connection registered"
    );

    send_to_connection(
        &tx,
        &OutboundEvent::Connected(Connected {
            user_id: profile.id.clone(),
            connection_id: connection_id.to_string(),
            display_name: profile.display_name.clone(),
        }),
    );
    publish_snapshot(state);
}

/// Tear down one connection. Returns true if it was the user's last one, in
/// which case the user is marked offline, leaves every room and the session
/// record is scheduled for removal after the grace window.
pub fn deregister(state: &AppState, user_id: &str, connection_id: &str) -> bool {
    let last_connection = match state.connections.entry(user_id.to_string()) {
        Entry::Occupied(mut handles) => {
            handles.get_mut().retain(|h| h.connection_id != connection_id);
            if handles.get().is_empty() {
                // Session state changes before the entry lock is released;
                // a reconnect registering next cancels the removal
                state.sessions.mark_offline(user_id);
                schedule_removal(state, user_id);
                handles.remove();
                true
            } else {
                false
            }
        }
        Entry::Vacant(_) => false,
    };

    tracing::debug!(
        user_id = %user_id,
        connection_id = %connection_id,
        last_connection,
        "Connection unregistered"
    );

    if !last_connection || state.connections.contains_key(user_id) {
        return last_connection;
    }

    for ride_id in state.rooms.leave_all(user_id) {
        tracing::info!(user_id = %user_id, ride_id = %ride_id, "User left ride on disconnect");
        send_to_room(
            &state.connections,
            &state.rooms,
            &ride_id,
            None,
            &OutboundEvent::UserLeftRide(RoomMember {
                ride_id: ride_id.clone(),
                user_id: user_id.to_string(),
                display_name: None,
            }),
        );
    }
    true
}

/// Remove the session record after the grace window unless the user
/// reconnects first (the reconnect aborts this task).
fn schedule_removal(state: &AppState, user_id: &str) {
    let task_state = state.clone();
    let uid = user_id.to_string();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(task_state.timings.disconnect_grace).await;
        if task_state.sessions.finish_removal(&uid) {
            tracing::debug!(user_id = %uid, "Session record removed after grace window");
            publish_snapshot(&task_state);
        }
    });
    state.sessions.track_removal(user_id, handle);
}
