//! Ride and booking access used by the event router for authorization,
//! location persistence and status relays.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::models::{Booking, BookingStatus, Ride, RideStatus};
use crate::error::{CoreError, CoreResult};
use crate::geo::Coordinates;

const RIDE_COLUMNS: &str = "id, driver_id, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng,
    total_seats, available_seats, status, current_lat, current_lng";

const BOOKING_COLUMNS: &str = "id, ride_id, passenger_id, seats, status, pickup_lat, pickup_lng";

/// Fields needed to create a ride (seeding and tests).
#[derive(Debug, Clone)]
pub struct NewRide {
    pub id: String,
    pub driver_id: String,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub total_seats: i64,
}

/// Fields needed to create a booking (seeding and tests).
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: String,
    pub ride_id: String,
    pub passenger_id: String,
    pub seats: i64,
    pub status: BookingStatus,
    pub pickup: Option<Coordinates>,
}

/// Outcome of a booking status change.
#[derive(Debug, Clone)]
pub struct BookingTransition {
    pub booking: Booking,
    /// Set when seat accounting moved the ride between `active` and `full`.
    pub ride_status_change: Option<RideStatus>,
}

fn parse_status<T>(raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown status '{}'", raw).into(),
        )
    })
}

fn ride_from_row(row: &Row<'_>) -> rusqlite::Result<Ride> {
    let current_lat: Option<f64> = row.get(9)?;
    let current_lng: Option<f64> = row.get(10)?;
    Ok(Ride {
        id: row.get(0)?,
        driver_id: row.get(1)?,
        pickup: Coordinates::new(row.get(2)?, row.get(3)?),
        dropoff: Coordinates::new(row.get(4)?, row.get(5)?),
        total_seats: row.get(6)?,
        available_seats: row.get(7)?,
        status: parse_status(row.get(8)?, RideStatus::parse)?,
        current_location: current_lat.zip(current_lng).map(|(lat, lng)| Coordinates::new(lat, lng)),
    })
}

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    let pickup_lat: Option<f64> = row.get(5)?;
    let pickup_lng: Option<f64> = row.get(6)?;
    Ok(Booking {
        id: row.get(0)?,
        ride_id: row.get(1)?,
        passenger_id: row.get(2)?,
        seats: row.get(3)?,
        status: parse_status(row.get(4)?, BookingStatus::parse)?,
        pickup: pickup_lat.zip(pickup_lng).map(|(lat, lng)| Coordinates::new(lat, lng)),
    })
}

pub fn insert_ride(conn: &Connection, ride: &NewRide) -> rusqlite::Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO rides (id, driver_id, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng,
                            total_seats, available_seats, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 'active', ?8, ?8)",
        rusqlite::params![
            ride.id,
            ride.driver_id,
            ride.pickup.lat,
            ride.pickup.lng,
            ride.dropoff.lat,
            ride.dropoff.lng,
            ride.total_seats,
            now
        ],
    )?;
    Ok(())
}

/// Insert a booking. Bookings created already holding seats take them from
/// the ride immediately.
pub fn insert_booking(conn: &mut Connection, booking: &NewBooking) -> CoreResult<()> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO bookings (id, ride_id, passenger_id, seats, status, pickup_lat, pickup_lng,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        rusqlite::params![
            booking.id,
            booking.ride_id,
            booking.passenger_id,
            booking.seats,
            booking.status.as_str(),
            booking.pickup.map(|p| p.lat),
            booking.pickup.map(|p| p.lng),
            now
        ],
    )?;
    if booking.status.holds_seats() {
        adjust_seats(&tx, &booking.ride_id, -booking.seats)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn get_ride(conn: &Connection, ride_id: &str) -> rusqlite::Result<Option<Ride>> {
    conn.query_row(
        &format!("SELECT {} FROM rides WHERE id = ?1", RIDE_COLUMNS),
        [ride_id],
        ride_from_row,
    )
    .optional()
}

pub fn get_booking(conn: &Connection, booking_id: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {} FROM bookings WHERE id = ?1", BOOKING_COLUMNS),
        [booking_id],
        booking_from_row,
    )
    .optional()
}

/// All bookings on a ride, oldest first, in any status.
pub fn list_bookings(conn: &Connection, ride_id: &str) -> rusqlite::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bookings WHERE ride_id = ?1 ORDER BY created_at ASC, id ASC",
        BOOKING_COLUMNS
    ))?;
    let rows = stmt.query_map([ride_id], booking_from_row)?;
    rows.collect()
}

pub fn update_ride_location(
    conn: &Connection,
    ride_id: &str,
    location: Coordinates,
) -> rusqlite::Result<usize> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE rides SET current_lat = ?2, current_lng = ?3, location_updated_at = ?4, updated_at = ?4
         WHERE id = ?1",
        rusqlite::params![ride_id, location.lat, location.lng, now],
    )
}

pub fn set_ride_status(conn: &Connection, ride_id: &str, status: RideStatus) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE rides SET status = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![ride_id, status.as_str(), Utc::now().to_rfc3339()],
    )
}

/// Change a booking's status and keep the ride's seat count in step.
///
/// Moving into confirmed/active takes seats, moving out returns them. When the
/// ride is open for booking (`active`/`full`) it flips to `full` at zero seats
/// and back to `active` once seats free up.
pub fn set_booking_status(
    conn: &mut Connection,
    booking_id: &str,
    status: BookingStatus,
    reason: Option<&str>,
) -> CoreResult<BookingTransition> {
    let tx = conn.transaction()?;

    let mut booking = tx
        .query_row(
            &format!("SELECT {} FROM bookings WHERE id = ?1", BOOKING_COLUMNS),
            [booking_id],
            booking_from_row,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("Booking not found"))?;

    let seat_delta = match (booking.status.holds_seats(), status.holds_seats()) {
        (false, true) => -booking.seats,
        (true, false) => booking.seats,
        _ => 0,
    };

    tx.execute(
        "UPDATE bookings SET status = ?2, status_reason = ?3, updated_at = ?4 WHERE id = ?1",
        rusqlite::params![booking_id, status.as_str(), reason, Utc::now().to_rfc3339()],
    )?;
    booking.status = status;

    let ride_status_change = if seat_delta != 0 {
        adjust_seats(&tx, &booking.ride_id, seat_delta)?
    } else {
        None
    };

    tx.commit()?;

    Ok(BookingTransition {
        booking,
        ride_status_change,
    })
}

/// Apply a seat delta to a ride and return the automatic status change, if any.
fn adjust_seats(conn: &Connection, ride_id: &str, delta: i64) -> CoreResult<Option<RideStatus>> {
    let ride = conn
        .query_row(
            &format!("SELECT {} FROM rides WHERE id = ?1", RIDE_COLUMNS),
            [ride_id],
            ride_from_row,
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("Ride not found"))?;

    let available = ride.available_seats + delta;
    if available < 0 {
        return Err(CoreError::unauthorized("Not enough seats available on this ride"));
    }
    let available = available.min(ride.total_seats);

    let next_status = match ride.status {
        RideStatus::Active if available == 0 => Some(RideStatus::Full),
        RideStatus::Full if available > 0 => Some(RideStatus::Active),
        _ => None,
    };
    let status = next_status.unwrap_or(ride.status);

    conn.execute(
        "UPDATE rides SET available_seats = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
        rusqlite::params![ride_id, available, status.as_str(), Utc::now().to_rfc3339()],
    )?;

    Ok(next_status)
}
