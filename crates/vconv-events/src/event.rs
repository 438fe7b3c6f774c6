//! Task lifecycle events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vconv_models::TaskDescriptor;

/// What happened to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Created,
    Updated,
    Completed,
    Failed,
}

impl TaskAction {
    /// The `type` string carried in firehose payloads.
    pub fn change_kind(&self) -> &'static str {
        match self {
            TaskAction::Created => "create",
            TaskAction::Updated | TaskAction::Completed | TaskAction::Failed => "update",
        }
    }
}

/// One event on the bus: an action plus the post-commit task snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub action: TaskAction,
    pub task: TaskDescriptor,
}

impl TaskEvent {
    pub fn new(action: TaskAction, task: TaskDescriptor) -> Self {
        Self { action, task }
    }

    /// Id of the per-task topic this event belongs to.
    pub fn task_id(&self) -> Uuid {
        self.task.task_id
    }

    /// Topic name, `task:{uuid}`.
    pub fn topic(&self) -> String {
        format!("task:{}", self.task.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconv_models::TaskStatus;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            task_id: Uuid::new_v4(),
            video_path: "/movies/a.mp4".into(),
            dest_path: None,
            worker_id: 1,
            worker_name: "w1".into(),
            progress: 0.0,
            status: TaskStatus::Running,
            error_message: None,
            elapsed_time: 0,
            remaining_time: None,
        }
    }

    #[test]
    fn test_topic_name() {
        let event = TaskEvent::new(TaskAction::Created, descriptor());
        assert_eq!(event.topic(), format!("task:{}", event.task.task_id));
    }

    #[test]
    fn test_change_kinds() {
        assert_eq!(TaskAction::Created.change_kind(), "create");
        assert_eq!(TaskAction::Updated.change_kind(), "update");
        assert_eq!(TaskAction::Failed.change_kind(), "update");
    }
}
