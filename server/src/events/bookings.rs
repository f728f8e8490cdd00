use chrono::Utc;

use super::access::{load_ride, passenger_ids};
use super::rides::announce_ride_status;
use super::ConnectionContext;
use crate::db::{self, models::BookingStatus};
use crate::error::{CoreError, CoreResult};
use crate::state::AppState;
use crate::ws::broadcast::{send_to_room, send_to_users};
use crate::ws::protocol::{
    require_id, BookingStatusChange, BookingStatusNotice, OutboundEvent, RideStatusNotice,
    RoomMember,
};

/// update_booking_status: the ride's driver or the booking's passenger.
///
/// The passenger and driver are notified on their personal channels and the
/// room sees the same event. Seat accounting may move the ride between
/// `active` and `full`; that change is relayed as a ride status. A cancelled
/// passenger is removed from the ride room.
pub async fn update_booking_status(
    state: &AppState,
    ctx: &ConnectionContext,
    change: BookingStatusChange,
) -> CoreResult<()> {
    let booking_id = require_id(&change.booking_id, "bookingId")?.to_string();
    let status = BookingStatus::parse(change.status.trim()).ok_or_else(|| {
        CoreError::protocol(format!("Unknown booking status '{}'", change.status))
    })?;

    let bid = booking_id.clone();
    let booking = db::with_conn(&state.db, move |conn| {
        db::rides::get_booking(conn, &bid)?.ok_or_else(|| CoreError::not_found("Booking not found"))
    })
    .await?;

    let (ride, mut bookings) = load_ride(state, &booking.ride_id).await?;
    if ctx.user_id != ride.driver_id && ctx.user_id != booking.passenger_id {
        return Err(CoreError::unauthorized(
            "Only the driver or the passenger can update this booking",
        ));
    }

    let reason = change.reason.clone();
    let transition = db::with_conn(&state.db, move |conn| {
        db::rides::set_booking_status(conn, &booking_id, status, reason.as_deref())
    })
    .await?;

    let booking = transition.booking;
    tracing::info!(
        user_id = %ctx.user_id,
        booking_id = %booking.id,
        ride_id = %booking.ride_id,
        status = status.as_str(),
        "Booking status updated"
    );

    let notice = OutboundEvent::BookingStatusUpdated(BookingStatusNotice {
        booking_id: booking.id.clone(),
        ride_id: booking.ride_id.clone(),
        passenger_id: booking.passenger_id.clone(),
        status,
        reason: change.reason,
        updated_by: ctx.user_id.clone(),
        timestamp: Utc::now(),
    });
    send_to_users(
        &state.connections,
        [booking.passenger_id.as_str(), ride.driver_id.as_str()],
        &notice,
    );
    send_to_room(&state.connections, &state.rooms, &booking.ride_id, None, &notice);

    if !status.grants_access() && state.rooms.leave(&booking.ride_id, &booking.passenger_id) {
        tracing::info!(
            user_id = %booking.passenger_id,
            ride_id = %booking.ride_id,
            "Passenger removed from ride room after booking change"
        );
        send_to_room(
            &state.connections,
            &state.rooms,
            &booking.ride_id,
            None,
            &OutboundEvent::UserLeftRide(RoomMember {
                ride_id: booking.ride_id.clone(),
                user_id: booking.passenger_id.clone(),
                display_name: None,
            }),
        );
    }

    if let Some(ride_status) = transition.ride_status_change {
        if let Some(slot) = bookings.iter_mut().find(|b| b.id == booking.id) {
            *slot = booking.clone();
        }
        tracing::info!(
            ride_id = %booking.ride_id,
            to = ride_status.as_str(),
            "Ride status changed by seat accounting"
        );
        announce_ride_status(
            state,
            &passenger_ids(&bookings),
            RideStatusNotice {
                ride_id: booking.ride_id.clone(),
                status: ride_status,
                reason: None,
                updated_by: None,
                timestamp: Utc::now(),
            },
        );
    }
    Ok(())
}
