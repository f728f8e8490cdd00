//! Driver-approaching alerts.
//!
//! Each driver location update is checked against the pickup of every
//! seat-holding booking with a recorded pickup coordinate. A passenger's
//! pickup distance is the nearer of the ride's pickup point and their own
//! pickup coordinate. A passenger is alerted at most once per trip; the
//! ledger is cleared when the ride completes or is cancelled.

use dashmap::DashSet;

use crate::config::ProximityConfig;
use crate::db::models::{Booking, Ride};
use crate::geo::{eta_minutes, haversine_km, Coordinates};
use crate::ws::protocol::DriverApproaching;

/// Fired alerts, keyed by (ride_id, passenger_id).
#[derive(Debug, Default)]
pub struct AlertLedger {
    fired: DashSet<(String, String)>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the alert for a (ride, passenger) pair. Returns false if it has
    /// already fired this trip. The check and the claim are one atomic insert.
    pub fn try_fire(&self, ride_id: &str, passenger_id: &str) -> bool {
        self.fired
            .insert((ride_id.to_string(), passenger_id.to_string()))
    }

    pub fn has_fired(&self, ride_id: &str, passenger_id: &str) -> bool {
        self.fired
            .contains(&(ride_id.to_string(), passenger_id.to_string()))
    }

    /// Forget every alert of a ride (trip completed or cancelled).
    pub fn reset_ride(&self, ride_id: &str) -> usize {
        let before = self.fired.len();
        self.fired.retain(|(ride, _)| ride != ride_id);
        before - self.fired.len()
    }

    pub fn close(&self) {
        self.fired.clear();
    }
}

/// Distance rounded to two decimals for display.
fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

/// Evaluate a driver position against the ride's bookings and return the
/// alerts to deliver, one per passenger, already claimed in the ledger.
pub fn evaluate(
    ledger: &AlertLedger,
    config: &ProximityConfig,
    ride: &Ride,
    bookings: &[Booking],
    driver_location: Coordinates,
) -> Vec<(String, DriverApproaching)> {
    let ride_id = ride.id.as_str();
    bookings
        .iter()
        .filter(|b| b.status.holds_seats())
        .filter_map(|b| {
            // Passengers without their own pickup board at the ride's
            let pickup = b.pickup.unwrap_or(ride.pickup);
            let distance_km = haversine_km(driver_location, pickup);
            if distance_km > config.alert_radius_km {
                return None;
            }
            if !ledger.try_fire(ride_id, &b.passenger_id) {
                return None;
            }
            Some((
                b.passenger_id.clone(),
                DriverApproaching {
                    ride_id: ride_id.to_string(),
                    distance_km: round_km(distance_km),
                    eta_minutes: eta_minutes(distance_km, config.eta_minutes_per_km),
                    driver_location,
                },
            ))
        })
        .collect()
}
