//! Realtime channel message schemas.
//!
//! Clients manage subscriptions over a single socket: per-task topics keyed
//! by task id, plus the `tasks_room` firehose of every lifecycle event.

use serde::{Deserialize, Serialize};

use crate::task::TaskDescriptor;

/// Name of the firehose room carrying all task lifecycle events.
pub const TASKS_ROOM: &str = "tasks_room";

/// A client-initiated subscription change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    Subscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    Unsubscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
}

/// A server push on the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerPush {
    /// Update on a task the client subscribed to directly
    TaskUpdate(TaskDescriptor),
    /// Firehose entry for `tasks_room` subscribers
    TasksUpdate(RoomUpdate),
}

/// Firehose payload: the descriptor plus what happened to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUpdate {
    /// "create" for new tasks, "update" for everything after
    #[serde(rename = "type")]
    pub change: String,
    pub task: TaskDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use uuid::Uuid;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            task_id: Uuid::new_v4(),
            video_path: "/movies/a.mp4".into(),
            dest_path: None,
            worker_id: 1,
            worker_name: "w1".into(),
            progress: 50.0,
            status: TaskStatus::Running,
            error_message: None,
            elapsed_time: 30,
            remaining_time: Some(30),
        }
    }

    #[test]
    fn test_client_op_parses() {
        let op: ClientOp =
            serde_json::from_str(r#"{"op":"subscribe","task_id":"abc"}"#).unwrap();
        match op {
            ClientOp::Subscribe { task_id, room } => {
                assert_eq!(task_id.as_deref(), Some("abc"));
                assert!(room.is_none());
            }
            _ => panic!("expected subscribe"),
        }

        let op: ClientOp =
            serde_json::from_str(r#"{"op":"unsubscribe","room":"tasks_room"}"#).unwrap();
        match op {
            ClientOp::Unsubscribe { room, .. } => {
                assert_eq!(room.as_deref(), Some(TASKS_ROOM))
            }
            _ => panic!("expected unsubscribe"),
        }
    }

    #[test]
    fn test_server_push_envelope() {
        let json = serde_json::to_value(ServerPush::TaskUpdate(descriptor())).unwrap();
        assert_eq!(json["event"], "task_update");
        assert_eq!(json["payload"]["status"], 1);

        let json = serde_json::to_value(ServerPush::TasksUpdate(RoomUpdate {
            change: "update".into(),
            task: descriptor(),
        }))
        .unwrap();
        assert_eq!(json["event"], "tasks_update");
        assert_eq!(json["payload"]["type"], "update");
    }
}
