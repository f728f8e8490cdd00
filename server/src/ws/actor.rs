use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use uuid::Uuid;

use crate::db::models::UserProfile;
use crate::events::{self, ConnectionContext};
use crate::state::AppState;
use crate::ws::broadcast::send_to_connection;
use crate::ws::lifecycle;
use crate::ws::protocol::OutboundEvent;
use crate::ws::ConnectionSender;

/// Close code sent when a connection misses a heartbeat.
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 1001;

/// How long teardown waits for queued frames to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Heartbeat task: pings every interval and flags a connection that did not
///   answer the previous ping
/// - Reader loop (this task): handles frames one at a time, in order
///
/// The mpsc channel allows any part of the system to send messages to this client
/// by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, profile: UserProfile) {
    let connection_id = Uuid::now_v7().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Spawn writer task first so the handshake frames are flushed
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    lifecycle::register(&state, &profile, &connection_id, tx.clone());

    tracing::info!(
        user_id = %profile.id,
        connection_id = %connection_id,
        "WebSocket actor started"
    );

    let alive = Arc::new(AtomicBool::new(true));
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();
    let heartbeat_handle = tokio::spawn(heartbeat_task(
        state.clone(),
        profile.id.clone(),
        connection_id.clone(),
        tx.clone(),
        alive.clone(),
        dead_tx,
    ));

    let ctx = ConnectionContext {
        user_id: profile.id.clone(),
        connection_id: connection_id.clone(),
        display_name: profile.display_name.clone(),
        tx: tx.clone(),
        alive,
    };

    // Reader loop: process incoming WebSocket messages
    loop {
        tokio::select! {
            missed = &mut dead_rx => {
                if missed.is_err() {
                    // Heartbeat stopped because the writer is gone
                    break;
                }
                tracing::warn!(
                    user_id = %ctx.user_id,
                    connection_id = %ctx.connection_id,
                    "Heartbeat missed, closing connection"
                );
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_HEARTBEAT_TIMEOUT,
                    reason: "Heartbeat timeout".into(),
                })));
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        events::handle_text(&state, &ctx, text.as_str()).await;
                    }
                    Message::Binary(_) => {
                        send_to_connection(
                            &tx,
                            &OutboundEvent::error("Protocol violation: binary frames are not supported"),
                        );
                    }
                    Message::Pong(_) => {
                        ctx.heartbeat_reply(&state);
                    }
                    Message::Ping(data) => {
                        // Respond to client pings with pong
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            user_id = %ctx.user_id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %ctx.user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    // Stream ended: client disconnected
                    tracing::info!(user_id = %ctx.user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Stop pinging before cleanup so no ping fires after deregistration
    heartbeat_handle.abort();
    let _ = heartbeat_handle.await;

    lifecycle::deregister(&state, &ctx.user_id, &ctx.connection_id);

    // Let the writer flush what is queued (e.g. the close frame), then stop it
    drop(ctx);
    drop(tx);
    let mut writer_handle = writer_handle;
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %profile.id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Heartbeat: each tick sends a ping and clears the liveness flag. If the
/// flag is still clear at the next tick, no pong arrived within one interval
/// and the reader is told to close.
async fn heartbeat_task(
    state: AppState,
    user_id: String,
    connection_id: String,
    tx: ConnectionSender,
    alive: Arc<AtomicBool>,
    dead: oneshot::Sender<()>,
) {
    let mut ticker = interval(state.timings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if !alive.swap(false, Ordering::AcqRel) {
            let _ = dead.send(());
            return;
        }
        state.sessions.mark_pinged(&user_id, &connection_id);

        if tx.send(Message::Ping(Vec::new().into())).is_err() {
            // Writer task has died: connection is gone
            return;
        }
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed: connection is broken
            break;
        }
        if closing {
            break;
        }
    }
}
