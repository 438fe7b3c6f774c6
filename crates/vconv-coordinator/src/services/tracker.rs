//! Task tracker: drive the task state machine from worker reports.

use tracing::{info, warn};
use uuid::Uuid;

use vconv_events::{EventBus, TaskAction, TaskEvent};
use vconv_models::{Task, TaskStatus, TranscodeStatus};
use vconv_store::CatalogStore;

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A `PATCH /tasks/{id}` report from the assigned worker.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub worker_id: i64,
    pub progress: f64,
    pub status: TaskStatus,
    pub elapsed_time: Option<i64>,
    pub remaining_time: Option<i64>,
    pub error_message: Option<String>,
}

pub struct TaskTracker {
    catalog: CatalogStore,
    events: EventBus,
}

impl TaskTracker {
    pub fn new(catalog: CatalogStore, events: EventBus) -> Self {
        Self { catalog, events }
    }

    /// Validate and apply one worker report in a single transaction,
    /// publishing the resulting event after commit.
    pub async fn apply_update(&self, task_uuid: Uuid, update: TaskUpdate) -> ApiResult<Task> {
        let mut tx = self.catalog.begin().await?;

        let task = self
            .catalog
            .lock_task_by_uuid(&mut tx, task_uuid)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("no task {task_uuid}")))?;

        if task.worker_id != update.worker_id {
            warn!(
                task_id = %task_uuid,
                assigned = task.worker_id,
                reported = update.worker_id,
                "update from wrong worker rejected"
            );
            return Err(ApiError::validation(format!(
                "task {task_uuid} is assigned to worker {}, not {}",
                task.worker_id, update.worker_id
            )));
        }

        if !task.status.can_transition_to(update.status) {
            return Err(ApiError::validation(format!(
                "illegal transition {} -> {} for task {task_uuid}",
                task.status, update.status
            )));
        }

        // Reports count as heartbeats too
        self.catalog
            .touch_heartbeat(&mut tx, task.worker_id)
            .await?;

        let (updated, action) = match update.status {
            TaskStatus::Running => {
                let updated = self
                    .catalog
                    .record_task_progress(
                        &mut tx,
                        task.id,
                        update.progress,
                        update.elapsed_time,
                        update.remaining_time,
                    )
                    .await?;
                // First progress moves the video from Created to Running
                if let Some(video) = self.catalog.lock_video(&mut tx, task.video_id).await? {
                    if video.transcode_status != TranscodeStatus::Running {
                        self.catalog.set_video_running(&mut tx, video.id).await?;
                    }
                }
                (updated, TaskAction::Updated)
            }
            TaskStatus::Completed => {
                let updated = self
                    .catalog
                    .complete_task(&mut tx, task.id, update.elapsed_time)
                    .await?;
                self.catalog
                    .set_video_terminal(&mut tx, task.video_id, TranscodeStatus::Completed)
                    .await?;
                self.release_worker(&mut tx, &task).await?;
                (updated, TaskAction::Completed)
            }
            TaskStatus::Failed => {
                let message = update
                    .error_message
                    .as_deref()
                    .unwrap_or("worker reported failure");
                let updated = self
                    .catalog
                    .fail_task(
                        &mut tx,
                        task.id,
                        message,
                        Some(update.progress),
                        update.elapsed_time,
                    )
                    .await?;
                self.catalog
                    .set_video_terminal(&mut tx, task.video_id, TranscodeStatus::Failed)
                    .await?;
                self.catalog
                    .append_log(&mut tx, Some(task.id), vconv_models::LogLevel::Error, message)
                    .await?;
                self.release_worker(&mut tx, &task).await?;
                (updated, TaskAction::Failed)
            }
            TaskStatus::Created => {
                // can_transition_to never admits Created as a target
                unreachable!("transition into Created was validated away")
            }
        };

        tx.commit().await.map_err(vconv_store::StoreError::from)?;

        match action {
            TaskAction::Completed => {
                info!(task_id = %task_uuid, "task completed");
                metrics::record_task_terminal("completed");
            }
            TaskAction::Failed => {
                warn!(
                    task_id = %task_uuid,
                    error = updated.error_message.as_deref().unwrap_or(""),
                    "task failed"
                );
                metrics::record_task_terminal("failed");
            }
            _ => {}
        }
        self.events
            .publish(TaskEvent::new(action, updated.descriptor()));

        Ok(updated)
    }

    /// Return the worker to Idle, but only while it still points at this
    /// task; a reclaimed registration may already be busy elsewhere.
    async fn release_worker(
        &self,
        tx: &mut vconv_store::Tx,
        task: &Task,
    ) -> ApiResult<()> {
        if let Some(worker) = self.catalog.lock_worker(tx, task.worker_id).await? {
            if worker.current_task_id == Some(task.id) {
                self.catalog.set_worker_idle(tx, worker.id).await?;
            }
        }
        Ok(())
    }
}
