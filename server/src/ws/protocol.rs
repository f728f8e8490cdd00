//! JSON wire protocol.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`. Inbound events form a
//! closed enum so the router's match is exhaustive; outbound events share the
//! same envelope.

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;

use crate::db::models::{BookingStatus, ChatMessage, RideStatus};
use crate::error::{CoreError, CoreResult};
use crate::geo::Coordinates;
use crate::presence::PresenceEntry;

/// Largest accepted chat message body (chars).
pub const MAX_CONTENT_LENGTH: usize = 2000;

// --- Inbound (client -> server) ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    JoinRide(RideRef),
    LeaveRide(RideRef),
    UpdateLocation(LocationUpdate),
    SendMessage(SendMessage),
    MarkMessageRead(MarkMessageRead),
    EmergencyAlert(EmergencyReport),
    UpdateRideStatus(RideStatusChange),
    UpdateBookingStatus(BookingStatusChange),
    TypingStart(RideRef),
    TypingStop(RideRef),
    UpdateStatus(StatusChange),
    /// Application-level heartbeat reply, equivalent to a pong frame. Any
    /// payload is ignored.
    Pong(Option<IgnoredAny>),
}

impl InboundEvent {
    /// Event name as sent by the client, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRide(_) => "join_ride",
            Self::LeaveRide(_) => "leave_ride",
            Self::UpdateLocation(_) => "update_location",
            Self::SendMessage(_) => "send_message",
            Self::MarkMessageRead(_) => "mark_message_read",
            Self::EmergencyAlert(_) => "emergency_alert",
            Self::UpdateRideStatus(_) => "update_ride_status",
            Self::UpdateBookingStatus(_) => "update_booking_status",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::UpdateStatus(_) => "update_status",
            Self::Pong(_) => "pong",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRef {
    pub ride_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub ride_id: String,
    pub location: Coordinates,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub ride_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessageRead {
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    pub ride_id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusChange {
    pub ride_id: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusChange {
    pub booking_id: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: String,
}

/// Decode a text frame into an inbound event.
pub fn decode_inbound(text: &str) -> CoreResult<InboundEvent> {
    serde_json::from_str(text).map_err(|e| CoreError::protocol(format!("Malformed event: {}", e)))
}

/// Reject blank identifiers before they reach persistence.
pub fn require_id<'a>(value: &'a str, field: &str) -> CoreResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::protocol(format!("{} is required", field)));
    }
    Ok(trimmed)
}

// --- Outbound (server -> client) ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub user_id: String,
    pub connection_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub ride_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    pub ride_id: String,
    pub driver_id: String,
    pub location: Coordinates,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverApproaching {
    pub ride_id: String,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub driver_location: Coordinates,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: String,
    pub ride_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyBroadcast {
    pub alert_id: String,
    pub ride_id: String,
    pub user_id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub description: Option<String>,
    pub location: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusNotice {
    pub ride_id: String,
    pub status: RideStatus,
    pub reason: Option<String>,
    /// None for automatic transitions (seat accounting).
    pub updated_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStatusNotice {
    pub booking_id: String,
    pub ride_id: String,
    pub passenger_id: String,
    pub status: BookingStatus,
    pub reason: Option<String>,
    pub updated_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Connected(Connected),
    UsersOnline(Vec<PresenceEntry>),
    UserJoinedRide(RoomMember),
    UserLeftRide(RoomMember),
    LocationUpdate(DriverLocation),
    DriverApproaching(DriverApproaching),
    NewMessage(ChatMessage),
    MessageRead(MessageRead),
    EmergencyAlert(EmergencyBroadcast),
    /// Serialised as `ride_<status>`.
    RideStatus(RideStatusNotice),
    BookingStatusUpdated(BookingStatusNotice),
    UserTyping(RoomMember),
    UserStoppedTyping(RoomMember),
    Error(ErrorNotice),
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Event name on the wire.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Self::Connected(_) => "connected".into(),
            Self::UsersOnline(_) => "users_online".into(),
            Self::UserJoinedRide(_) => "user_joined_ride".into(),
            Self::UserLeftRide(_) => "user_left_ride".into(),
            Self::LocationUpdate(_) => "location_update".into(),
            Self::DriverApproaching(_) => "driver_approaching".into(),
            Self::NewMessage(_) => "new_message".into(),
            Self::MessageRead(_) => "message_read".into(),
            Self::EmergencyAlert(_) => "emergency_alert".into(),
            Self::RideStatus(notice) => format!("ride_{}", notice.status.as_str()).into(),
            Self::BookingStatusUpdated(_) => "booking_status_updated".into(),
            Self::UserTyping(_) => "user_typing".into(),
            Self::UserStoppedTyping(_) => "user_stopped_typing".into(),
            Self::Error(_) => "error".into(),
        }
    }
}

impl Serialize for OutboundEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut frame = serializer.serialize_struct("OutboundEvent", 2)?;
        frame.serialize_field("event", &self.name())?;
        match self {
            Self::Connected(data) => frame.serialize_field("data", data)?,
            Self::UsersOnline(data) => frame.serialize_field("data", data)?,
            Self::UserJoinedRide(data) => frame.serialize_field("data", data)?,
            Self::UserLeftRide(data) => frame.serialize_field("data", data)?,
            Self::LocationUpdate(data) => frame.serialize_field("data", data)?,
            Self::DriverApproaching(data) => frame.serialize_field("data", data)?,
            Self::NewMessage(data) => frame.serialize_field("data", data)?,
            Self::MessageRead(data) => frame.serialize_field("data", data)?,
            Self::EmergencyAlert(data) => frame.serialize_field("data", data)?,
            Self::RideStatus(data) => frame.serialize_field("data", data)?,
            Self::BookingStatusUpdated(data) => frame.serialize_field("data", data)?,
            Self::UserTyping(data) => frame.serialize_field("data", data)?,
            Self::UserStoppedTyping(data) => frame.serialize_field("data", data)?,
            Self::Error(data) => frame.serialize_field("data", data)?,
        }
        frame.end()
    }
}
