use chrono::Utc;

use super::access::authorize_participant;
use super::ConnectionContext;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::state::AppState;
use crate::ws::broadcast::{send_to_room, send_to_users};
use crate::ws::protocol::{require_id, EmergencyBroadcast, EmergencyReport, OutboundEvent};

/// emergency_alert: persisted, then delivered to the whole room (sender
/// included) and to the personal channel of every participant who is not in
/// the room.
pub async fn raise(
    state: &AppState,
    ctx: &ConnectionContext,
    report: EmergencyReport,
) -> CoreResult<()> {
    let ride_id = require_id(&report.ride_id, "rideId")?.to_string();
    let alert_type = require_id(&report.alert_type, "type")?.to_string();
    if report.location.is_some_and(|l| !l.is_valid()) {
        return Err(CoreError::protocol("Invalid coordinates"));
    }

    let access = authorize_participant(state, &ride_id, &ctx.user_id).await?;

    let (rid, uid, kind) = (ride_id.clone(), ctx.user_id.clone(), alert_type.clone());
    let description = report.description.clone();
    let location = report.location;
    let alert_id = db::with_conn(&state.db, move |conn| {
        Ok(db::messages::insert_emergency_alert(
            conn,
            &rid,
            &uid,
            &kind,
            description.as_deref(),
            location,
        )?)
    })
    .await?;

    tracing::warn!(
        alert_id = %alert_id,
        ride_id = %ride_id,
        user_id = %ctx.user_id,
        alert_type = %alert_type,
        "Emergency alert raised"
    );

    let event = OutboundEvent::EmergencyAlert(EmergencyBroadcast {
        alert_id,
        ride_id: ride_id.clone(),
        user_id: ctx.user_id.clone(),
        display_name: ctx.display_name.clone(),
        alert_type,
        description: report.description,
        location: report.location,
        timestamp: Utc::now(),
    });

    send_to_room(&state.connections, &state.rooms, &ride_id, None, &event);
    let outside_room: Vec<&str> = access
        .participants()
        .into_iter()
        .filter(|p| !state.rooms.is_member(&ride_id, p))
        .collect();
    send_to_users(&state.connections, outside_room, &event);
    Ok(())
}
