//! Ride authorization: who may act on a ride.

use std::collections::BTreeSet;

use crate::db::{self, models::Booking, models::Ride};
use crate::error::{CoreError, CoreResult};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Driver,
    Passenger,
}

/// A ride together with its bookings, as seen by an authorized caller.
#[derive(Debug, Clone)]
pub struct RideAccess {
    pub ride: Ride,
    pub bookings: Vec<Booking>,
    pub role: Role,
}

impl RideAccess {
    pub fn passengers(&self) -> Vec<&str> {
        passenger_ids(&self.bookings)
    }

    /// Driver plus every authorized passenger.
    pub fn participants(&self) -> Vec<&str> {
        let mut ids = vec![self.ride.driver_id.as_str()];
        ids.extend(
            self.passengers()
                .into_iter()
                .filter(|p| *p != self.ride.driver_id),
        );
        ids
    }
}

/// Passengers holding a non-cancelled booking, sorted and deduplicated.
pub fn passenger_ids(bookings: &[Booking]) -> Vec<&str> {
    let ids: BTreeSet<&str> = bookings
        .iter()
        .filter(|b| b.status.grants_access())
        .map(|b| b.passenger_id.as_str())
        .collect();
    ids.into_iter().collect()
}

/// Load a ride and all of its bookings in one blocking call.
pub async fn load_ride(state: &AppState, ride_id: &str) -> CoreResult<(Ride, Vec<Booking>)> {
    let ride_id = ride_id.to_string();
    db::with_conn(&state.db, move |conn| {
        let ride = db::rides::get_ride(conn, &ride_id)?
            .ok_or_else(|| CoreError::not_found("Ride not found"))?;
        let bookings = db::rides::list_bookings(conn, &ride_id)?;
        Ok((ride, bookings))
    })
    .await
}

/// The caller must be the ride's driver or hold a non-cancelled booking on it.
pub async fn authorize_participant(
    state: &AppState,
    ride_id: &str,
    user_id: &str,
) -> CoreResult<RideAccess> {
    let (ride, bookings) = load_ride(state, ride_id).await?;
    let role = role_of(&ride, &bookings, user_id)
        .ok_or_else(|| CoreError::unauthorized("You are not a participant of this ride"))?;
    Ok(RideAccess {
        ride,
        bookings,
        role,
    })
}

/// The caller must be the ride's driver.
pub async fn authorize_driver(
    state: &AppState,
    ride_id: &str,
    user_id: &str,
) -> CoreResult<RideAccess> {
    let (ride, bookings) = load_ride(state, ride_id).await?;
    if ride.driver_id != user_id {
        return Err(CoreError::unauthorized("Only the driver can do this"));
    }
    Ok(RideAccess {
        ride,
        bookings,
        role: Role::Driver,
    })
}

fn role_of(ride: &Ride, bookings: &[Booking], user_id: &str) -> Option<Role> {
    if ride.driver_id == user_id {
        return Some(Role::Driver);
    }
    bookings
        .iter()
        .any(|b| b.passenger_id == user_id && b.status.grants_access())
        .then_some(Role::Passenger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{BookingStatus, RideStatus};
    use crate::geo::Coordinates;

    fn ride() -> Ride {
        Ride {
            id: "ride-1".to_string(),
            driver_id: "driver".to_string(),
            pickup: Coordinates::new(12.90, 77.50),
            dropoff: Coordinates::new(12.97, 77.59),
            total_seats: 3,
            available_seats: 3,
            status: RideStatus::Active,
            current_location: None,
        }
    }

    fn booking(passenger: &str, status: BookingStatus) -> Booking {
        Booking {
            id: format!("b-{}", passenger),
            ride_id: "ride-1".to_string(),
            passenger_id: passenger.to_string(),
            seats: 1,
            status,
            pickup: None,
        }
    }

    #[test]
    fn test_roles() {
        let bookings = vec![
            booking("alice", BookingStatus::Pending),
            booking("bob", BookingStatus::Cancelled),
        ];
        assert_eq!(role_of(&ride(), &bookings, "driver"), Some(Role::Driver));
        assert_eq!(role_of(&ride(), &bookings, "alice"), Some(Role::Passenger));
        assert_eq!(role_of(&ride(), &bookings, "bob"), None);
        assert_eq!(role_of(&ride(), &bookings, "mallory"), None);
    }

    #[test]
    fn test_participants_exclude_cancelled_and_dedupe() {
        let access = RideAccess {
            ride: ride(),
            bookings: vec![
                booking("carol", BookingStatus::Confirmed),
                booking("alice", BookingStatus::Active),
                booking("alice", BookingStatus::Completed),
                booking("bob", BookingStatus::Cancelled),
            ],
            role: Role::Driver,
        };
        assert_eq!(access.passengers(), vec!["alice", "carol"]);
        assert_eq!(access.participants(), vec!["driver", "alice", "carol"]);
    }
}
