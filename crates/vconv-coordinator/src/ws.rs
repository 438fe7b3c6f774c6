//! Realtime channel: `/socket`.
//!
//! One socket carries any number of subscriptions; clients send
//! subscribe/unsubscribe ops and receive task pushes. Delivery is
//! fire-and-forget; clients that miss events poll `GET /tasks/{id}`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vconv_events::TaskEvent;
use vconv_models::{ClientOp, RoomUpdate, ServerPush, TASKS_ROOM};

use crate::metrics;
use crate::state::AppState;

/// Global counter for open realtime connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_PING_INTERVAL: Duration = Duration::from_secs(5);
const WS_PONG_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_connections(count);

    ws.on_upgrade(|socket| async move {
        handle_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_connections(count);
    })
}

/// Per-connection subscription state.
#[derive(Debug, Default)]
struct Subscriptions {
    tasks: HashSet<Uuid>,
    firehose: bool,
}

impl Subscriptions {
    fn apply(&mut self, op: ClientOp) {
        match op {
            ClientOp::Subscribe { task_id, room } => {
                if let Some(id) = task_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()) {
                    self.tasks.insert(id);
                }
                if room.as_deref() == Some(TASKS_ROOM) {
                    self.firehose = true;
                }
            }
            ClientOp::Unsubscribe { task_id, room } => {
                if let Some(id) = task_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()) {
                    self.tasks.remove(&id);
                }
                if room.as_deref() == Some(TASKS_ROOM) {
                    self.firehose = false;
                }
            }
        }
    }

    /// Pushes owed to this connection for one bus event.
    fn pushes_for(&self, event: &TaskEvent) -> Vec<ServerPush> {
        let mut pushes = Vec::new();
        if self.tasks.contains(&event.task_id()) {
            pushes.push(ServerPush::TaskUpdate(event.task.clone()));
        }
        if self.firehose {
            pushes.push(ServerPush::TasksUpdate(RoomUpdate {
                change: event.action.change_kind().to_string(),
                task: event.task.clone(),
            }));
        }
        pushes
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel so a slow client applies backpressure to its own
    // connection only
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut bus_rx = state.events.subscribe();
    let mut subs = Subscriptions::default();
    let mut ping = interval(WS_PING_INTERVAL);
    let mut last_pong = Instant::now();

    debug!("realtime client connected");

    loop {
        tokio::select! {
            event = bus_rx.recv() => {
                match event {
                    Ok(event) => {
                        let mut client_gone = false;
                        for push in subs.pushes_for(&event) {
                            let Ok(json) = serde_json::to_string(&push) else { continue };
                            if tx.send(Message::Text(json)).await.is_err() {
                                warn!("realtime send failed, client gone");
                                client_gone = true;
                                break;
                            }
                        }
                        if client_gone {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // At-most-once: drop and let the client re-poll
                        warn!(missed, "realtime client lagged, events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > WS_PONG_TIMEOUT {
                    info!("realtime client missed pong window, closing");
                    break;
                }
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientOp>(&text) {
                            Ok(op) => {
                                debug!(?op, "subscription change");
                                subs.apply(op);
                            }
                            Err(e) => debug!(error = %e, "ignoring malformed client op"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = tx.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("realtime client closed");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "realtime receive error");
                        break;
                    }
                }
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconv_events::TaskAction;
    use vconv_models::{TaskDescriptor, TaskStatus};

    fn event(task_id: Uuid) -> TaskEvent {
        TaskEvent::new(
            TaskAction::Updated,
            TaskDescriptor {
                task_id,
                video_path: "/movies/a.mp4".into(),
                dest_path: None,
                worker_id: 1,
                worker_name: "w1".into(),
                progress: 10.0,
                status: TaskStatus::Running,
                error_message: None,
                elapsed_time: 5,
                remaining_time: None,
            },
        )
    }

    #[test]
    fn test_unsubscribed_connection_gets_nothing() {
        let subs = Subscriptions::default();
        assert!(subs.pushes_for(&event(Uuid::new_v4())).is_empty());
    }

    #[test]
    fn test_task_subscription_filters_by_id() {
        let id = Uuid::new_v4();
        let mut subs = Subscriptions::default();
        subs.apply(ClientOp::Subscribe {
            task_id: Some(id.to_string()),
            room: None,
        });

        assert_eq!(subs.pushes_for(&event(id)).len(), 1);
        assert!(subs.pushes_for(&event(Uuid::new_v4())).is_empty());

        subs.apply(ClientOp::Unsubscribe {
            task_id: Some(id.to_string()),
            room: None,
        });
        assert!(subs.pushes_for(&event(id)).is_empty());
    }

    #[test]
    fn test_firehose_gets_everything() {
        let mut subs = Subscriptions::default();
        subs.apply(ClientOp::Subscribe {
            task_id: None,
            room: Some(TASKS_ROOM.to_string()),
        });
        let pushes = subs.pushes_for(&event(Uuid::new_v4()));
        assert_eq!(pushes.len(), 1);
        assert!(matches!(pushes[0], ServerPush::TasksUpdate(_)));
    }

    #[test]
    fn test_dual_subscription_gets_both_pushes() {
        let id = Uuid::new_v4();
        let mut subs = Subscriptions::default();
        subs.apply(ClientOp::Subscribe {
            task_id: Some(id.to_string()),
            room: Some(TASKS_ROOM.to_string()),
        });
        assert_eq!(subs.pushes_for(&event(id)).len(), 2);
    }

    #[test]
    fn test_malformed_task_id_is_ignored() {
        let mut subs = Subscriptions::default();
        subs.apply(ClientOp::Subscribe {
            task_id: Some("not-a-uuid".into()),
            room: None,
        });
        assert!(subs.tasks.is_empty());
    }
}
