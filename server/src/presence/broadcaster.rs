use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::OutboundEvent;

/// Recompute the online snapshot and publish it to every connection.
/// Called on registration, deferred removal, explicit status change and by
/// the periodic sweep.
pub fn publish_snapshot(state: &AppState) {
    let snapshot = state.sessions.online_snapshot(state.timings.stale_after);
    tracing::debug!(online = snapshot.len(), "Publishing presence snapshot");
    broadcast_to_all(&state.connections, &OutboundEvent::UsersOnline(snapshot));
}

/// Spawn the corrective sweep: evicts records idle beyond the staleness bound
/// and republishes the snapshot, guarding against missed disconnects.
pub fn spawn_presence_sweeper(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.presence_sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(&state);
        }
    })
}

/// One sweep pass. Returns the evicted user ids.
pub fn sweep_once(state: &AppState) -> Vec<String> {
    let evicted = state.sessions.evict_stale(state.timings.stale_after);
    if !evicted.is_empty() {
        tracing::info!(count = evicted.len(), "Evicted stale presence records");
    }
    publish_snapshot(state);
    evicted
}
