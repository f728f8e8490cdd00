use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Accounts, rides and bookings

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    profile_image TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE rides (
    id TEXT PRIMARY KEY,
    driver_id TEXT NOT NULL,
    pickup_lat REAL NOT NULL,
    pickup_lng REAL NOT NULL,
    dropoff_lat REAL NOT NULL,
    dropoff_lng REAL NOT NULL,
    total_seats INTEGER NOT NULL,
    available_seats INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    current_lat REAL,
    current_lng REAL,
    location_updated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (driver_id) REFERENCES users(id)
);

CREATE INDEX idx_rides_driver ON rides(driver_id);

CREATE TABLE bookings (
    id TEXT PRIMARY KEY,
    ride_id TEXT NOT NULL,
    passenger_id TEXT NOT NULL,
    seats INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'pending',
    pickup_lat REAL,
    pickup_lng REAL,
    status_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (ride_id) REFERENCES rides(id),
    FOREIGN KEY (passenger_id) REFERENCES users(id)
);

CREATE INDEX idx_bookings_ride ON bookings(ride_id);
CREATE INDEX idx_bookings_passenger ON bookings(passenger_id);
",
        ),
        M::up(
            "-- Migration 2: Ride chat and emergency alerts

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    ride_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'text',
    metadata TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (ride_id) REFERENCES rides(id),
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX idx_messages_ride ON messages(ride_id, created_at);

-- Recipients are a snapshot taken at send time
CREATE TABLE message_recipients (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE message_reads (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    read_at TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE emergency_alerts (
    id TEXT PRIMARY KEY,
    ride_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    description TEXT,
    lat REAL,
    lng REAL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (ride_id) REFERENCES rides(id)
);

CREATE INDEX idx_emergency_alerts_ride ON emergency_alerts(ride_id);
",
        ),
    ])
}
