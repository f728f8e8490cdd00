use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{PresenceEntry, PresenceStatus};
use crate::db::models::UserProfile;

/// Connection metadata for one user, as shown in presence snapshots.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub user_id: String,
    /// Most recently registered connection of this user.
    pub connection_id: String,
    pub display_name: String,
    pub profile_image: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub status: PresenceStatus,
    /// Heartbeat liveness of `connection_id`; cleared on each ping, set on pong.
    pub is_alive: bool,
}

impl ConnectionRecord {
    fn to_entry(&self) -> PresenceEntry {
        PresenceEntry {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            profile_image: self.profile_image.clone(),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_seen_at);
        idle.to_std().map(|idle| idle > stale_after).unwrap_or(false)
    }
}

/// Session directory: user_id -> ConnectionRecord.
///
/// Records outlive their connection by a grace window. The pending removal
/// task is kept here so a reconnect inside the window can cancel it.
#[derive(Default)]
pub struct SessionDirectory {
    records: DashMap<String, ConnectionRecord>,
    pending_removals: DashMap<String, JoinHandle<()>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the record for a newly authenticated connection.
    /// Cancels any deferred removal still pending for this user.
    pub fn register(&self, profile: &UserProfile, connection_id: &str) -> ConnectionRecord {
        if let Some((_, pending)) = self.pending_removals.remove(&profile.id) {
            pending.abort();
            tracing::debug!(user_id = %profile.id, "Deferred removal cancelled by reconnect");
        }

        let record = ConnectionRecord {
            user_id: profile.id.clone(),
            connection_id: connection_id.to_string(),
            display_name: profile.display_name.clone(),
            profile_image: profile.profile_image.clone(),
            last_seen_at: Utc::now(),
            status: PresenceStatus::Online,
            is_alive: true,
        };
        self.records.insert(profile.id.clone(), record.clone());
        record
    }

    pub fn get(&self, user_id: &str) -> Option<ConnectionRecord> {
        self.records.get(user_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Heartbeat tick: the connection owes us a pong.
    pub fn mark_pinged(&self, user_id: &str, connection_id: &str) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            if record.connection_id == connection_id {
                record.is_alive = false;
            }
        }
    }

    /// Heartbeat reply from any of the user's connections.
    pub fn record_pong(&self, user_id: &str, connection_id: &str) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            record.last_seen_at = Utc::now();
            if record.connection_id == connection_id {
                record.is_alive = true;
            }
        }
    }

    /// Explicit status change. Returns false when the user has no record.
    pub fn set_status(&self, user_id: &str, status: PresenceStatus) -> bool {
        match self.records.get_mut(user_id) {
            Some(mut record) => {
                record.status = status;
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Last connection closed: reflect it immediately, remove later.
    pub fn mark_offline(&self, user_id: &str) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            record.status = PresenceStatus::Offline;
            record.is_alive = false;
        }
    }

    /// Track the deferred removal task for a user, replacing any older one.
    pub fn track_removal(&self, user_id: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.pending_removals.insert(user_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Called when the grace window elapses. Removes the record only if the
    /// user is still offline. Returns true if a record was removed.
    pub fn finish_removal(&self, user_id: &str) -> bool {
        self.pending_removals.remove(user_id);
        self.records
            .remove_if(user_id, |_, record| record.status == PresenceStatus::Offline)
            .is_some()
    }

    /// Online users not idle beyond the staleness bound, sorted by name.
    pub fn online_snapshot(&self, stale_after: Duration) -> Vec<PresenceEntry> {
        let now = Utc::now();
        let mut entries: Vec<PresenceEntry> = self
            .records
            .iter()
            .filter(|r| r.status == PresenceStatus::Online && !r.is_stale(now, stale_after))
            .map(|r| r.to_entry())
            .collect();
        entries.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }

    /// Evict records idle beyond the staleness bound. Returns evicted user ids.
    pub fn evict_stale(&self, stale_after: Duration) -> Vec<String> {
        let now = Utc::now();
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.is_stale(now, stale_after))
            .map(|r| r.key().clone())
            .collect();

        stale
            .into_iter()
            .filter(|user_id| {
                self.records
                    .remove_if(user_id, |_, record| record.is_stale(now, stale_after))
                    .is_some()
            })
            .collect()
    }

    /// Abort pending removals and forget every record (server shutdown).
    pub fn close(&self) {
        for entry in self.pending_removals.iter() {
            entry.value().abort();
        }
        self.pending_removals.clear();
        self.records.clear();
    }

    #[cfg(test)]
    fn backdate(&self, user_id: &str, by: chrono::Duration) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            record.last_seen_at -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: name.to_string(),
            profile_image: None,
        }
    }

    const STALE: Duration = Duration::from_secs(1800);

    #[test]
    fn test_register_defaults_online_and_alive() {
        let dir = SessionDirectory::new();
        let record = dir.register(&profile("u1", "Uma"), "c1");
        assert_eq!(record.status, PresenceStatus::Online);
        assert!(record.is_alive);
        assert_eq!(dir.online_snapshot(STALE).len(), 1);
    }

    #[test]
    fn test_heartbeat_flags_follow_latest_connection() {
        let dir = SessionDirectory::new();
        dir.register(&profile("u1", "Uma"), "c1");
        dir.mark_pinged("u1", "c1");
        assert!(!dir.get("u1").unwrap().is_alive);
        dir.record_pong("u1", "c1");
        assert!(dir.get("u1").unwrap().is_alive);

        // A ping for an older connection does not touch the record
        dir.register(&profile("u1", "Uma"), "c2");
        dir.mark_pinged("u1", "c1");
        assert!(dir.get("u1").unwrap().is_alive);
    }

    #[test]
    fn test_snapshot_only_lists_online_users() {
        let dir = SessionDirectory::new();
        dir.register(&profile("u1", "Zed"), "c1");
        dir.register(&profile("u2", "Amy"), "c2");
        dir.register(&profile("u3", "Bea"), "c3");
        dir.set_status("u3", PresenceStatus::Busy);
        dir.mark_offline("u1");

        let snapshot = dir.online_snapshot(STALE);
        let ids: Vec<_> = snapshot.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u2"]);
    }

    #[test]
    fn test_finish_removal_spares_reconnected_user() {
        let dir = SessionDirectory::new();
        dir.register(&profile("u1", "Uma"), "c1");
        dir.mark_offline("u1");
        dir.register(&profile("u1", "Uma"), "c2");
        assert!(!dir.finish_removal("u1"));
        assert!(dir.get("u1").is_some());

        dir.mark_offline("u1");
        assert!(dir.finish_removal("u1"));
        assert!(dir.get("u1").is_none());
    }

    #[test]
    fn test_stale_records_hidden_and_evicted() {
        let dir = SessionDirectory::new();
        dir.register(&profile("u1", "Uma"), "c1");
        dir.register(&profile("u2", "Vic"), "c2");
        dir.backdate("u1", chrono::Duration::minutes(31));

        let snapshot = dir.online_snapshot(STALE);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, "u2");

        assert_eq!(dir.evict_stale(STALE), vec!["u1".to_string()]);
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn test_register_aborts_pending_removal() {
        let dir = SessionDirectory::new();
        dir.register(&profile("u1", "Uma"), "c1");
        dir.mark_offline("u1");

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = handle.abort_handle();
        dir.track_removal("u1", handle);

        dir.register(&profile("u1", "Uma"), "c2");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(abort.is_finished());
        assert_eq!(dir.get("u1").unwrap().status, PresenceStatus::Online);
    }
}
