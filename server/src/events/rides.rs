use chrono::Utc;

use super::access::{authorize_driver, authorize_participant};
use super::ConnectionContext;
use crate::db::{self, models::RideStatus};
use crate::error::{CoreError, CoreResult};
use crate::proximity;
use crate::state::AppState;
use crate::ws::broadcast::{send_to_room, send_to_user, send_to_users};
use crate::ws::protocol::{
    require_id, DriverLocation, LocationUpdate, OutboundEvent, RideRef, RideStatusChange,
    RideStatusNotice, RoomMember,
};

/// join_ride: subscribe the caller to a ride room.
///
/// A repeated join by a member is accepted silently.
pub async fn join_ride(state: &AppState, ctx: &ConnectionContext, r: RideRef) -> CoreResult<()> {
    let ride_id = require_id(&r.ride_id, "rideId")?;
    let access = authorize_participant(state, ride_id, &ctx.user_id).await?;

    if !state.rooms.join(ride_id, &ctx.user_id) {
        tracing::debug!(user_id = %ctx.user_id, ride_id = %ride_id, "Already in ride room");
        return Ok(());
    }

    tracing::info!(
        user_id = %ctx.user_id,
        ride_id = %ride_id,
        role = ?access.role,
        "User joined ride"
    );

    send_to_room(
        &state.connections,
        &state.rooms,
        ride_id,
        Some(&ctx.user_id),
        &OutboundEvent::UserJoinedRide(RoomMember {
            ride_id: ride_id.to_string(),
            user_id: ctx.user_id.clone(),
            display_name: Some(ctx.display_name.clone()),
        }),
    );
    Ok(())
}

/// leave_ride: idempotent. Only an actual removal is broadcast.
pub fn leave_ride(state: &AppState, ctx: &ConnectionContext, r: RideRef) -> CoreResult<()> {
    let ride_id = require_id(&r.ride_id, "rideId")?;

    if !state.rooms.leave(ride_id, &ctx.user_id) {
        return Ok(());
    }

    tracing::info!(user_id = %ctx.user_id, ride_id = %ride_id, "User left ride");
    send_to_room(
        &state.connections,
        &state.rooms,
        ride_id,
        None,
        &OutboundEvent::UserLeftRide(RoomMember {
            ride_id: ride_id.to_string(),
            user_id: ctx.user_id.clone(),
            display_name: Some(ctx.display_name.clone()),
        }),
    );
    Ok(())
}

/// update_location: driver only. Persists, relays to the room on every call
/// and fires approaching alerts.
pub async fn update_location(
    state: &AppState,
    ctx: &ConnectionContext,
    update: LocationUpdate,
) -> CoreResult<()> {
    let ride_id = require_id(&update.ride_id, "rideId")?;
    let location = update.location;
    if !location.is_valid() {
        return Err(CoreError::protocol("Invalid coordinates"));
    }

    let access = authorize_driver(state, ride_id, &ctx.user_id).await?;

    let rid = ride_id.to_string();
    db::with_conn(&state.db, move |conn| {
        db::rides::update_ride_location(conn, &rid, location)?;
        Ok(())
    })
    .await?;

    send_to_room(
        &state.connections,
        &state.rooms,
        ride_id,
        Some(&ctx.user_id),
        &OutboundEvent::LocationUpdate(DriverLocation {
            ride_id: ride_id.to_string(),
            driver_id: ctx.user_id.clone(),
            location,
            timestamp: Utc::now(),
        }),
    );

    let alerts = proximity::evaluate(
        &state.alerts,
        &state.proximity,
        &access.ride,
        &access.bookings,
        location,
    );
    for (passenger_id, alert) in alerts {
        tracing::info!(
            ride_id = %ride_id,
            passenger_id = %passenger_id,
            distance_km = alert.distance_km,
            eta_minutes = alert.eta_minutes,
            "Driver approaching pickup"
        );
        send_to_user(
            &state.connections,
            &passenger_id,
            &OutboundEvent::DriverApproaching(alert),
        );
    }
    Ok(())
}

/// update_ride_status: driver only.
pub async fn update_ride_status(
    state: &AppState,
    ctx: &ConnectionContext,
    change: RideStatusChange,
) -> CoreResult<()> {
    let ride_id = require_id(&change.ride_id, "rideId")?;
    let status = RideStatus::parse(change.status.trim())
        .ok_or_else(|| CoreError::protocol(format!("Unknown ride status '{}'", change.status)))?;

    let access = authorize_driver(state, ride_id, &ctx.user_id).await?;

    let rid = ride_id.to_string();
    db::with_conn(&state.db, move |conn| {
        db::rides::set_ride_status(conn, &rid, status)?;
        Ok(())
    })
    .await?;

    tracing::info!(
        user_id = %ctx.user_id,
        ride_id = %ride_id,
        from = access.ride.status.as_str(),
        to = status.as_str(),
        "Ride status updated"
    );

    announce_ride_status(
        state,
        &access.passengers(),
        RideStatusNotice {
            ride_id: ride_id.to_string(),
            status,
            reason: change.reason,
            updated_by: Some(ctx.user_id.clone()),
            timestamp: Utc::now(),
        },
    );
    Ok(())
}

/// Fan a ride status out to each passenger's personal channel and to the
/// room. A finished trip clears the ride's approaching alerts.
pub fn announce_ride_status(state: &AppState, passengers: &[&str], notice: RideStatusNotice) {
    if notice.status.ends_trip() {
        let cleared = state.alerts.reset_ride(&notice.ride_id);
        tracing::debug!(ride_id = %notice.ride_id, cleared, "Proximity alerts reset");
    }

    let ride_id = notice.ride_id.clone();
    let event = OutboundEvent::RideStatus(notice);
    send_to_users(&state.connections, passengers.iter().copied(), &event);
    send_to_room(&state.connections, &state.rooms, &ride_id, None, &event);
}
