//! Integration tests for ride rooms: join/leave authorization, location relay,
//! approaching alerts and ride/booking status propagation.

mod common;

use common::{fast_timings, join, start_server, wait_until, TestServer};
use ridelink_server::db::models::{BookingStatus, RideStatus};
use ridelink_server::geo::Coordinates;
use serde_json::json;
use std::time::Duration;

const PICKUP_P: Coordinates = Coordinates {
    lat: 12.90,
    lng: 77.50,
};
const PICKUP_A: Coordinates = Coordinates {
    lat: 12.905,
    lng: 77.505,
};
const QUIET: Duration = Duration::from_millis(400);

/// Driver D with ride RD; alice holds a confirmed booking picking up at A.
fn seed_ride(server: &TestServer) {
    server.seed_user("driver", "Dee");
    server.seed_user("alice", "Alice");
    server.seed_user("mallory", "Mallory");
    server.seed_ride("ride-1", "driver", PICKUP_P, 3);
    server.seed_booking("b-alice", "ride-1", "alice", BookingStatus::Confirmed, Some(PICKUP_A));
}

fn ride_status(server: &TestServer, ride_id: &str) -> (RideStatus, i64) {
    let conn = server.state.db.lock().unwrap();
    let ride = ridelink_server::db::rides::get_ride(&conn, ride_id)
        .unwrap()
        .unwrap();
    (ride.status, ride.available_seats)
}

#[tokio::test]
async fn test_driver_approaching_fires_once() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;

    let at_p = json!({ "rideId": "ride-1", "location": { "lat": 12.90, "lng": 77.50 } });
    driver.send("update_location", at_p.clone()).await;

    let update = alice.next_event("location_update").await;
    assert_eq!(update["driverId"], "driver");
    assert_eq!(update["location"]["lat"], 12.90);

    let alert = alice.next_event("driver_approaching").await;
    assert_eq!(alert["rideId"], "ride-1");
    // Measured to alice's own pickup, ~0.78 km from the ride start
    assert_eq!(alert["distanceKm"], 0.78);
    assert_eq!(alert["etaMinutes"], 2);

    // Same position again: relayed, but no second alert
    driver.send("update_location", at_p).await;
    alice.next_event("location_update").await;
    alice.assert_no_event("driver_approaching", QUIET).await;

    // The driver never gets their own location back
    driver.assert_no_event("location_update", QUIET).await;

    let conn = server.state.db.lock().unwrap();
    let ride = ridelink_server::db::rides::get_ride(&conn, "ride-1")
        .unwrap()
        .unwrap();
    assert_eq!(ride.current_location, Some(PICKUP_P));
}

#[tokio::test]
async fn test_distant_pickup_alerts_on_its_own_approach() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);
    server.seed_user("bob", "Bob");
    // ~20 km north of the ride start
    server.seed_booking(
        "b-bob",
        "ride-1",
        "bob",
        BookingStatus::Confirmed,
        Some(Coordinates::new(13.08, 77.50)),
    );

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;
    join(&server, &mut bob, "ride-1", "bob").await;

    driver
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 12.90, "lng": 77.50 } }),
        )
        .await;
    alice.next_event("driver_approaching").await;
    bob.next_event("location_update").await;
    bob.assert_no_event("driver_approaching", QUIET).await;

    driver
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 13.079, "lng": 77.50 } }),
        )
        .await;
    let alert = bob.next_event("driver_approaching").await;
    assert_eq!(alert["distanceKm"], 0.11);
    assert_eq!(alert["etaMinutes"], 0);
    alice.assert_no_event("driver_approaching", QUIET).await;
}

#[tokio::test]
async fn test_unauthorized_join_is_rejected() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    join(&server, &mut driver, "ride-1", "driver").await;

    let mut mallory = server.connect("mallory").await;
    mallory.send("join_ride", json!({ "rideId": "ride-1" })).await;
    let err = mallory.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));

    assert_eq!(server.state.rooms.members("ride-1"), vec!["driver"]);
    driver.assert_no_event("user_joined_ride", QUIET).await;
}

#[tokio::test]
async fn test_join_unknown_ride_is_not_found() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut alice = server.connect("alice").await;
    alice.send("join_ride", json!({ "rideId": "ride-404" })).await;
    let err = alice.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Not found"));
    assert!(!server.state.rooms.contains_room("ride-404"));
}

#[tokio::test]
async fn test_cancelled_booking_cannot_join() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);
    server.seed_user("bob", "Bob");
    server.seed_booking("b-bob", "ride-1", "bob", BookingStatus::Cancelled, None);

    let mut bob = server.connect("bob").await;
    bob.send("join_ride", json!({ "rideId": "ride-1" })).await;
    let err = bob.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));
    assert!(!server.state.rooms.is_member("ride-1", "bob"));
}

#[tokio::test]
async fn test_join_broadcast_and_idempotent_leave() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;

    let joined = driver.next_event("user_joined_ride").await;
    assert_eq!(joined["userId"], "alice");
    assert_eq!(joined["displayName"], "Alice");
    alice.assert_no_event("user_joined_ride", QUIET).await;

    // Re-join is accepted without a second broadcast
    alice.send("join_ride", json!({ "rideId": "ride-1" })).await;
    driver.assert_no_event("user_joined_ride", QUIET).await;

    alice.send("leave_ride", json!({ "rideId": "ride-1" })).await;
    alice.send("leave_ride", json!({ "rideId": "ride-1" })).await;

    let left = driver.next_event("user_left_ride").await;
    assert_eq!(left["userId"], "alice");
    driver.assert_no_event("user_left_ride", QUIET).await;
    alice.assert_no_event("error", Duration::from_millis(100)).await;
    assert_eq!(server.state.rooms.members("ride-1"), vec!["driver"]);
}

#[tokio::test]
async fn test_last_leave_deletes_room() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    driver.send("leave_ride", json!({ "rideId": "ride-1" })).await;

    let rooms = server.state.rooms.clone();
    assert!(wait_until(move || !rooms.contains_room("ride-1"), Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_passenger_cannot_update_location() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;

    alice
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 12.9, "lng": 77.5 } }),
        )
        .await;
    let err = alice.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));
    driver.assert_no_event("location_update", QUIET).await;
}

#[tokio::test]
async fn test_invalid_coordinates_are_a_protocol_violation() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    driver
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 123.0, "lng": 77.5 } }),
        )
        .await;
    let err = driver.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Protocol violation"));
}

#[tokio::test]
async fn test_ride_status_fans_out_and_resets_alerts() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);
    server.seed_user("bob", "Bob");
    server.seed_booking("b-bob", "ride-1", "bob", BookingStatus::Pending, None);

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;

    driver
        .send(
            "update_ride_status",
            json!({ "rideId": "ride-1", "status": "in_progress" }),
        )
        .await;

    // bob is not in the room: personal channel only
    let started = bob.next_event("ride_in_progress").await;
    assert_eq!(started["status"], "in_progress");
    assert_eq!(started["updatedBy"], "driver");
    bob.assert_no_event("ride_in_progress", QUIET).await;

    // alice sees it on her personal channel and in the room
    alice.next_event("ride_in_progress").await;
    alice.next_event("ride_in_progress").await;

    // the driver is only reached through the room
    driver.next_event("ride_in_progress").await;
    driver.assert_no_event("ride_in_progress", QUIET).await;

    driver
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 12.905, "lng": 77.505 } }),
        )
        .await;
    alice.next_event("driver_approaching").await;
    assert!(server.state.alerts.has_fired("ride-1", "alice"));

    driver
        .send(
            "update_ride_status",
            json!({ "rideId": "ride-1", "status": "completed", "reason": "arrived" }),
        )
        .await;
    let done = bob.next_event("ride_completed").await;
    assert_eq!(done["reason"], "arrived");
    assert!(!server.state.alerts.has_fired("ride-1", "alice"));
    assert_eq!(ride_status(&server, "ride-1").0, RideStatus::Completed);
}

#[tokio::test]
async fn test_only_driver_changes_ride_status() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut alice = server.connect("alice").await;
    alice
        .send(
            "update_ride_status",
            json!({ "rideId": "ride-1", "status": "cancelled" }),
        )
        .await;
    let err = alice.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));
    assert_eq!(ride_status(&server, "ride-1").0, RideStatus::Active);

    let mut driver = server.connect("driver").await;
    driver
        .send(
            "update_ride_status",
            json!({ "rideId": "ride-1", "status": "teleported" }),
        )
        .await;
    let err = driver.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Protocol violation"));
}

#[tokio::test]
async fn test_confirming_last_seat_fills_ride() {
    let server = start_server(fast_timings()).await;
    server.seed_user("driver", "Dee");
    server.seed_user("alice", "Alice");
    server.seed_ride("ride-1", "driver", PICKUP_P, 1);
    server.seed_booking("b-alice", "ride-1", "alice", BookingStatus::Pending, Some(PICKUP_A));

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;

    driver
        .send(
            "update_booking_status",
            json!({ "bookingId": "b-alice", "status": "confirmed" }),
        )
        .await;

    let notice = alice.next_event("booking_status_updated").await;
    assert_eq!(notice["bookingId"], "b-alice");
    assert_eq!(notice["status"], "confirmed");
    assert_eq!(notice["updatedBy"], "driver");
    driver.next_event("booking_status_updated").await;

    let full = alice.next_event("ride_full").await;
    assert!(full["updatedBy"].is_null());
    assert_eq!(ride_status(&server, "ride-1"), (RideStatus::Full, 0));

    // The passenger cancels: the seat returns and the ride reopens
    alice
        .send(
            "update_booking_status",
            json!({ "bookingId": "b-alice", "status": "cancelled", "reason": "plans changed" }),
        )
        .await;
    let notice = driver.next_event("booking_status_updated").await;
    assert_eq!(notice["status"], "cancelled");
    assert_eq!(notice["reason"], "plans changed");
    assert_eq!(ride_status(&server, "ride-1"), (RideStatus::Active, 1));
}

#[tokio::test]
async fn test_stranger_cannot_update_booking() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut mallory = server.connect("mallory").await;
    mallory
        .send(
            "update_booking_status",
            json!({ "bookingId": "b-alice", "status": "cancelled" }),
        )
        .await;
    let err = mallory.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));

    mallory
        .send(
            "update_booking_status",
            json!({ "bookingId": "b-404", "status": "cancelled" }),
        )
        .await;
    let err = mallory.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Not found"));
    assert_eq!(ride_status(&server, "ride-1"), (RideStatus::Active, 2));
}

#[tokio::test]
async fn test_cancelled_passenger_leaves_room() {
    let server = start_server(fast_timings()).await;
    seed_ride(&server);

    let mut driver = server.connect("driver").await;
    let mut alice = server.connect("alice").await;
    join(&server, &mut driver, "ride-1", "driver").await;
    join(&server, &mut alice, "ride-1", "alice").await;

    driver
        .send(
            "update_booking_status",
            json!({ "bookingId": "b-alice", "status": "cancelled" }),
        )
        .await;

    let notice = alice.next_event("booking_status_updated").await;
    assert_eq!(notice["status"], "cancelled");
    let left = driver.next_event("user_left_ride").await;
    assert_eq!(left["userId"], "alice");
    driver.assert_no_event("user_left_ride", QUIET).await;
    assert!(!server.state.rooms.is_member("ride-1", "alice"));

    // No more live traffic for the cancelled passenger
    driver
        .send(
            "update_location",
            json!({ "rideId": "ride-1", "location": { "lat": 12.90, "lng": 77.50 } }),
        )
        .await;
    alice.assert_no_event("location_update", QUIET).await;

    // Re-joining is refused too
    alice.send("join_ride", json!({ "rideId": "ride-1" })).await;
    let err = alice.next_event("error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Unauthorized"));
}
