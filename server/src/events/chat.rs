use super::access::authorize_participant;
use super::ConnectionContext;
use crate::db::{self, messages::NewMessage, models::MessageKind};
use crate::error::{CoreError, CoreResult};
use crate::state::AppState;
use crate::ws::broadcast::{send_to_room, send_to_user};
use crate::ws::protocol::{
    require_id, MarkMessageRead, MessageRead, OutboundEvent, RideRef, RoomMember, SendMessage,
    MAX_CONTENT_LENGTH,
};

/// send_message: persist and broadcast to the whole room.
///
/// Recipients are every other authorized participant at send time, connected
/// or not. Delivery goes through the room, not the recipient list.
pub async fn send_message(
    state: &AppState,
    ctx: &ConnectionContext,
    msg: SendMessage,
) -> CoreResult<()> {
    let ride_id = require_id(&msg.ride_id, "rideId")?.to_string();

    let content = msg.content.trim();
    if content.is_empty() {
        return Err(CoreError::protocol("Message content is required"));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(CoreError::protocol(format!(
            "Message exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    let kind = match msg.kind.as_deref().map(str::trim) {
        None | Some("") => MessageKind::Text,
        Some(raw) => MessageKind::parse(raw)
            .ok_or_else(|| CoreError::protocol(format!("Unknown message type '{}'", raw)))?,
    };

    let access = authorize_participant(state, &ride_id, &ctx.user_id).await?;
    let recipient_ids: Vec<String> = access
        .participants()
        .into_iter()
        .filter(|p| *p != ctx.user_id)
        .map(str::to_string)
        .collect();

    let new_message = NewMessage {
        ride_id: ride_id.clone(),
        sender_id: ctx.user_id.clone(),
        recipient_ids,
        content: content.to_string(),
        kind,
        metadata: msg.metadata,
    };
    let message = db::with_conn(&state.db, move |conn| {
        db::messages::insert_message(conn, new_message)
    })
    .await?;

    tracing::debug!(
        user_id = %ctx.user_id,
        ride_id = %ride_id,
        message_id = %message.id,
        recipients = message.recipient_ids.len(),
        "Message sent"
    );

    send_to_room(
        &state.connections,
        &state.rooms,
        &ride_id,
        None,
        &OutboundEvent::NewMessage(message),
    );
    Ok(())
}

/// mark_message_read: only a recipient may mark. The sender hears about the
/// first read only.
pub async fn mark_message_read(
    state: &AppState,
    ctx: &ConnectionContext,
    m: MarkMessageRead,
) -> CoreResult<()> {
    let message_id = require_id(&m.message_id, "messageId")?.to_string();
    let user_id = ctx.user_id.clone();

    let (message, receipt) = db::with_conn(&state.db, move |conn| {
        let message = db::messages::get_message(conn, &message_id)?
            .ok_or_else(|| CoreError::not_found("Message not found"))?;
        if !message.recipient_ids.iter().any(|r| *r == user_id) {
            return Err(CoreError::unauthorized("You are not a recipient of this message"));
        }
        let receipt = db::messages::mark_read(conn, &message.id, &user_id)?;
        Ok((message, receipt))
    })
    .await?;

    let Some(receipt) = receipt else {
        return Ok(());
    };

    send_to_user(
        &state.connections,
        &message.sender_id,
        &OutboundEvent::MessageRead(MessageRead {
            message_id: message.id,
            ride_id: message.ride_id,
            user_id: receipt.user_id,
            read_at: receipt.read_at,
        }),
    );
    Ok(())
}

/// typing_start / typing_stop: relayed to the rest of the room. The caller
/// must currently be in the room.
pub fn typing(state: &AppState, ctx: &ConnectionContext, r: RideRef, started: bool) -> CoreResult<()> {
    let ride_id = require_id(&r.ride_id, "rideId")?;
    if !state.rooms.is_member(ride_id, &ctx.user_id) {
        return Err(CoreError::unauthorized("Join the ride before sending typing events"));
    }

    let member = RoomMember {
        ride_id: ride_id.to_string(),
        user_id: ctx.user_id.clone(),
        display_name: Some(ctx.display_name.clone()),
    };
    let event = if started {
        OutboundEvent::UserTyping(member)
    } else {
        OutboundEvent::UserStoppedTyping(member)
    };
    send_to_room(&state.connections, &state.rooms, ride_id, Some(&ctx.user_id), &event);
    Ok(())
}
