//! Transcode tasks: one attempt to transcode one video.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::InvalidCode;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i16", try_from = "i16")]
pub enum TaskStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states are sticky: no later update may mutate the task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a worker-reported transition from `self` to `next` is legal.
    ///
    /// Created -> Running -> {Completed, Failed}; a worker may also abort
    /// before its first progress report (Created -> Failed). Re-reporting
    /// Running while Running is how progress updates arrive.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Created => matches!(next, TaskStatus::Running | TaskStatus::Failed),
            TaskStatus::Running => matches!(
                next,
                TaskStatus::Running | TaskStatus::Completed | TaskStatus::Failed
            ),
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }
}

impl From<TaskStatus> for i16 {
    fn from(status: TaskStatus) -> i16 {
        match status {
            TaskStatus::Created => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed => 2,
            TaskStatus::Failed => 3,
        }
    }
}

impl TryFrom<i16> for TaskStatus {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TaskStatus::Created),
            1 => Ok(TaskStatus::Running),
            2 => Ok(TaskStatus::Completed),
            3 => Ok(TaskStatus::Failed),
            other => Err(InvalidCode::new("task_status", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transcode task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Internal row id
    pub id: i64,
    /// External id handed to workers and subscribers
    pub task_uuid: Uuid,
    pub video_id: i64,
    pub worker_id: i64,
    /// Worker name at dispatch time, kept even if the worker row changes
    pub worker_name: String,
    /// Video path at dispatch time
    pub source_path: String,
    /// Output location chosen by the worker, in-place when absent
    pub dest_path: Option<String>,
    pub status: TaskStatus,
    /// Percentage in [0, 100]
    pub progress: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
    pub remaining_seconds: Option<i64>,
    /// Advances on every accepted progress update; drives stall detection
    pub last_update_time: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl Task {
    /// Whether a running task has gone `timeout` without an accepted
    /// progress update.
    pub fn stalled(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status == TaskStatus::Running && now - self.last_update_time > timeout
    }

    /// Wire snapshot pushed to realtime subscribers.
    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            task_id: self.task_uuid,
            video_path: self.source_path.clone(),
            dest_path: self.dest_path.clone(),
            worker_id: self.worker_id,
            worker_name: self.worker_name.clone(),
            progress: self.progress,
            status: self.status,
            error_message: self.error_message.clone(),
            elapsed_time: self.elapsed_seconds,
            remaining_time: self.remaining_seconds,
        }
    }
}

/// Full task descriptor as published on the event bus and the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: Uuid,
    pub video_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    pub worker_id: i64,
    pub worker_name: String,
    pub progress: f64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_time: i64,
    pub remaining_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for code in 0..=3 {
            let status = TaskStatus::try_from(code).unwrap();
            assert_eq!(i16::from(status), code);
        }
        assert!(TaskStatus::try_from(4).is_err());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Created));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Created.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_stall_predicate() {
        let now = Utc::now();
        let mut task = Task {
            id: 1,
            task_uuid: Uuid::new_v4(),
            video_id: 2,
            worker_id: 3,
            worker_name: "w1".into(),
            source_path: "/movies/a.mp4".into(),
            dest_path: None,
            status: TaskStatus::Running,
            progress: 30.0,
            start_time: now - chrono::Duration::seconds(120),
            end_time: None,
            elapsed_seconds: 90,
            remaining_seconds: Some(90),
            last_update_time: now - chrono::Duration::seconds(90),
            error_message: None,
        };
        let timeout = chrono::Duration::seconds(60);
        assert!(task.stalled(now, timeout));

        task.last_update_time = now - chrono::Duration::seconds(10);
        assert!(!task.stalled(now, timeout));

        task.last_update_time = now - chrono::Duration::seconds(90);
        task.status = TaskStatus::Failed;
        assert!(!task.stalled(now, timeout));
    }

    #[test]
    fn test_descriptor_serializes_status_as_code() {
        let task = Task {
            id: 1,
            task_uuid: Uuid::new_v4(),
            video_id: 2,
            worker_id: 3,
            worker_name: "w1".into(),
            source_path: "/movies/a.mp4".into(),
            dest_path: None,
            status: TaskStatus::Running,
            progress: 42.0,
            start_time: Utc::now(),
            end_time: None,
            elapsed_seconds: 10,
            remaining_seconds: Some(14),
            last_update_time: Utc::now(),
            error_message: None,
        };
        let json = serde_json::to_value(task.descriptor()).unwrap();
        assert_eq!(json["status"], 1);
        assert_eq!(json["progress"], 42.0);
        assert!(json.get("dest_path").is_none());
    }
}
