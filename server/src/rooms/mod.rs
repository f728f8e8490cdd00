//! Ride rooms: which users are subscribed to each ride's channel.
//!
//! Membership is the real-time projection of ride authorization. The router
//! only calls `join` after checking the user is the driver or holds a
//! non-cancelled booking.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    /// ride_id -> member user ids
    rooms: Arc<DashMap<String, HashSet<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user to a ride room. Returns false if they were already a member.
    pub fn join(&self, ride_id: &str, user_id: &str) -> bool {
        self.rooms
            .entry(ride_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Remove a user from a ride room. Returns false if they were not a member,
    /// so callers broadcast a leave at most once. Empty rooms are deleted.
    pub fn leave(&self, ride_id: &str, user_id: &str) -> bool {
        let removed = match self.rooms.get_mut(ride_id) {
            Some(mut members) => members.value_mut().remove(user_id),
            None => return false,
        };
        // Re-checked under the shard lock so a concurrent join is never lost
        self.rooms.remove_if(ride_id, |_, members| members.is_empty());
        removed
    }

    /// Remove a user from every room they belong to.
    /// Returns the ride ids they left.
    pub fn leave_all(&self, user_id: &str) -> Vec<String> {
        // Collect ride IDs first to avoid holding locks during mutation
        let ride_ids: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(user_id))
            .map(|entry| entry.key().clone())
            .collect();

        ride_ids
            .into_iter()
            .filter(|ride_id| self.leave(ride_id, user_id))
            .collect()
    }

    pub fn is_member(&self, ride_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(ride_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false)
    }

    /// Snapshot of a room's members, sorted for stable fan-out order.
    pub fn members(&self, ride_id: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .rooms
            .get(ride_id)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn contains_room(&self, ride_id: &str) -> bool {
        self.rooms.contains_key(ride_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop every room (server shutdown).
    pub fn close(&self) {
        self.rooms.clear();
    }
}
