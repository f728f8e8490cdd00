use axum::extract::ws::{CloseFrame, Message};

use super::protocol::OutboundEvent;
use super::{ConnectionRegistry, ConnectionSender};
use crate::rooms::RoomRegistry;

/// Encode an event once so every recipient gets the same frame.
fn encode(event: &OutboundEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(event = %event.name(), error = %e, "Failed to encode outbound event");
            None
        }
    }
}

/// Send an event to a single connection.
pub fn send_to_connection(sender: &ConnectionSender, event: &OutboundEvent) {
    if let Some(msg) = encode(event) {
        let _ = sender.send(msg);
    }
}

/// Broadcast an event to every connected client.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &OutboundEvent) {
    let Some(msg) = encode(event) else {
        return;
    };

    for entry in registry.iter() {
        for handle in entry.value().iter() {
            let _ = handle.sender.send(msg.clone());
        }
    }
}

/// Send an event to a user's personal channel (all their connections).
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &OutboundEvent) {
    let Some(msg) = encode(event) else {
        return;
    };
    deliver(registry, user_id, &msg);
}

/// Send an event to several personal channels. Duplicate ids receive it once.
pub fn send_to_users<'a, I>(registry: &ConnectionRegistry, user_ids: I, event: &OutboundEvent)
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(msg) = encode(event) else {
        return;
    };
    let mut seen = std::collections::HashSet::new();
    for user_id in user_ids {
        if seen.insert(user_id) {
            deliver(registry, user_id, &msg);
        }
    }
}

/// Broadcast an event to every member of a ride room, optionally skipping one
/// user (the originator).
pub fn send_to_room(
    registry: &ConnectionRegistry,
    rooms: &RoomRegistry,
    ride_id: &str,
    except: Option<&str>,
    event: &OutboundEvent,
) {
    let members = rooms.members(ride_id);
    if members.is_empty() {
        return;
    }
    let Some(msg) = encode(event) else {
        return;
    };
    for user_id in members.iter().filter(|m| Some(m.as_str()) != except) {
        deliver(registry, user_id, &msg);
    }
}

fn deliver(registry: &ConnectionRegistry, user_id: &str, msg: &Message) {
    if let Some(connections) = registry.get(user_id) {
        for handle in connections.value().iter() {
            let _ = handle.sender.send(msg.clone());
        }
    }
}

/// Force-close every connection (server shutdown).
/// Sends a WebSocket Close frame with the given code and reason.
pub fn force_close_all(registry: &ConnectionRegistry, close_code: u16, reason: &str) {
    let close_frame = CloseFrame {
        code: close_code,
        reason: reason.into(),
    };
    for entry in registry.iter() {
        for handle in entry.value().iter() {
            let _ = handle
                .sender
                .send(Message::Close(Some(close_frame.clone())));
        }
    }
}
