/// Row types for the persistence collaborator.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

/// Ride lifecycle. `Active -> Full` happens automatically when seats run out;
/// every other transition is driven by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Active,
    Full,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "full" => Some(Self::Full),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Full => "full",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// The trip is over; per-trip state (approach alerts) can be dropped.
    pub fn ends_trip(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Any non-cancelled booking entitles the passenger to the ride room.
    pub fn grants_access(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Seats are held (and a pickup is pending) while confirmed or active.
    pub fn holds_seats(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Active)
    }
}

/// Profile fields denormalised into presence snapshots.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ride {
    pub id: String,
    pub driver_id: String,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub total_seats: i64,
    pub available_seats: i64,
    pub status: RideStatus,
    pub current_location: Option<Coordinates>,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub id: String,
    pub ride_id: String,
    pub passenger_id: String,
    pub seats: i64,
    pub status: BookingStatus,
    pub pickup: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Location,
    Image,
    System,
}

impl MessageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "location" => Some(Self::Location),
            "image" => Some(Self::Image),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Location => "location",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// A persisted ride chat message. `recipient_ids` is frozen at send time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub ride_id: String,
    pub sender_id: String,
    pub recipient_ids: Vec<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub read_by: Vec<ReadReceipt>,
}
