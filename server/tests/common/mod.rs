//! Shared helpers for the integration tests: a real server on a random port,
//! seeded rides and tokio-tungstenite clients speaking the JSON protocol.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use ridelink_server::config::{ProximityConfig, Timings};
use ridelink_server::db::models::BookingStatus;
use ridelink_server::db::rides::{insert_booking, insert_ride, NewBooking, NewRide};
use ridelink_server::db::users::insert_user;
use ridelink_server::geo::Coordinates;
use ridelink_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    // Keep the data directory alive for the server's lifetime
    _data_dir: TempDir,
}

/// Timings suited to tests: short grace window, sweep disabled in practice.
pub fn fast_timings() -> Timings {
    Timings {
        heartbeat_interval: Duration::from_secs(1),
        disconnect_grace: Duration::from_millis(200),
        presence_sweep_interval: Duration::from_secs(3600),
        stale_after: Duration::from_secs(1800),
    }
}

/// Aggressive heartbeat for liveness tests.
pub fn heartbeat_timings() -> Timings {
    Timings {
        heartbeat_interval: Duration::from_millis(300),
        ..fast_timings()
    }
}

/// Start the server on a random port with a fresh database.
pub async fn start_server(timings: Timings) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = data_dir.path().to_str().unwrap().to_string();

    let db = ridelink_server::db::init_db(&path).expect("Failed to init DB");
    let jwt_secret = ridelink_server::auth::jwt::load_or_generate_jwt_secret(&path)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret, timings, ProximityConfig::default());
    let app = ridelink_server::routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        _data_dir: data_dir,
    }
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn token(&self, user_id: &str) -> String {
        ridelink_server::auth::jwt::issue_access_token(&self.state.jwt_secret, user_id, 900)
            .unwrap()
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn seed_user(&self, id: &str, display_name: &str) {
        let conn = self.state.db.lock().unwrap();
        insert_user(&conn, id, display_name, None).unwrap();
    }

    pub fn seed_ride(&self, id: &str, driver_id: &str, pickup: Coordinates, seats: i64) {
        let conn = self.state.db.lock().unwrap();
        insert_ride(
            &conn,
            &NewRide {
                id: id.to_string(),
                driver_id: driver_id.to_string(),
                pickup,
                dropoff: Coordinates::new(12.97, 77.59),
                total_seats: seats,
            },
        )
        .unwrap();
    }

    pub fn seed_booking(
        &self,
        id: &str,
        ride_id: &str,
        passenger_id: &str,
        status: BookingStatus,
        pickup: Option<Coordinates>,
    ) {
        let mut conn = self.state.db.lock().unwrap();
        insert_booking(
            &mut conn,
            &NewBooking {
                id: id.to_string(),
                ride_id: ride_id.to_string(),
                passenger_id: passenger_id.to_string(),
                seats: 1,
                status,
                pickup,
            },
        )
        .unwrap();
    }

    /// Connect as `user_id` and consume the `connected` handshake.
    pub async fn connect(&self, user_id: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(&self.token(user_id)))
            .await
            .expect("Failed to connect");
        let mut client = Client { ws };
        let connected = client.next_event("connected").await;
        assert_eq!(connected["userId"], user_id);
        client
    }
}

pub struct Client {
    pub ws: WsStream,
}

impl Client {
    pub async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.ws.send(Message::text(frame)).await.unwrap();
    }

    /// Next JSON frame, skipping control frames. None on close or timeout.
    pub async fn next_json(&mut self, within: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match frame.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Wait for the named event, skipping others, and return its data.
    pub async fn next_event(&mut self, name: &str) -> Value {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_json(remaining).await {
                Some(frame) if frame["event"] == name => return frame["data"].clone(),
                Some(_) => continue,
                None => panic!("Expected '{}' event, got none", name),
            }
        }
    }

    /// Assert the named event does not arrive within `within`.
    pub async fn assert_no_event(&mut self, name: &str, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.next_json(remaining).await {
                Some(frame) if frame["event"] == name => {
                    panic!("Unexpected '{}' event: {}", name, frame)
                }
                Some(_) => continue,
                None => return,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Send join_ride and wait until the registry reflects it.
pub async fn join(server: &TestServer, client: &mut Client, ride_id: &str, user_id: &str) {
    client.send("join_ride", json!({ "rideId": ride_id })).await;
    let rooms = server.state.rooms.clone();
    let (ride, user) = (ride_id.to_string(), user_id.to_string());
    assert!(
        wait_until(move || rooms.is_member(&ride, &user), EVENT_TIMEOUT).await,
        "{} never joined {}",
        user_id,
        ride_id
    );
}
