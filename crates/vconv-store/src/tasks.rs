//! Transcode task repository.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;
use vconv_models::{Task, TaskStatus};

use crate::{CatalogStore, Page, SortOrder, StoreResult, Tx};

const TASK_COLUMNS: &str = "id, task_uuid, video_id, worker_id, worker_name, source_path, \
                            dest_path, status, progress, start_time, end_time, elapsed_seconds, \
                            remaining_seconds, last_update_time, error_message";

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    task_uuid: Uuid,
    video_id: i64,
    worker_id: i64,
    worker_name: String,
    source_path: String,
    dest_path: Option<String>,
    status: i16,
    progress: f64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    elapsed_seconds: i64,
    remaining_seconds: Option<i64>,
    last_update_time: DateTime<Utc>,
    error_message: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = crate::StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            task_uuid: row.task_uuid,
            video_id: row.video_id,
            worker_id: row.worker_id,
            worker_name: row.worker_name,
            source_path: row.source_path,
            dest_path: row.dest_path,
            status: TaskStatus::try_from(row.status)?,
            progress: row.progress,
            start_time: row.start_time,
            end_time: row.end_time,
            elapsed_seconds: row.elapsed_seconds,
            remaining_seconds: row.remaining_seconds,
            last_update_time: row.last_update_time,
            error_message: row.error_message,
        })
    }
}

/// Payload for task creation at dispatch time.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_uuid: Uuid,
    pub video_id: i64,
    pub worker_id: i64,
    pub worker_name: String,
    pub source_path: String,
    pub dest_path: Option<String>,
}

/// Filters for `GET /tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub statuses: Vec<TaskStatus>,
    pub worker_id: Option<i64>,
    pub sort_by: TaskSortKey,
    pub order: SortOrder,
}

/// Whitelisted sort columns for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSortKey {
    #[default]
    StartTime,
    LastUpdateTime,
    Progress,
    EndTime,
}

impl TaskSortKey {
    pub fn from_param(param: &str) -> Option<Self> {
        match param {
            "start_time" => Some(Self::StartTime),
            "last_update_time" => Some(Self::LastUpdateTime),
            "progress" => Some(Self::Progress),
            "end_time" => Some(Self::EndTime),
            _ => None,
        }
    }

    fn as_column(&self) -> &'static str {
        match self {
            Self::StartTime => "start_time",
            Self::LastUpdateTime => "last_update_time",
            Self::Progress => "progress",
            Self::EndTime => "end_time",
        }
    }
}

fn push_task_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &TaskQuery) {
    builder.push(" WHERE TRUE");
    if !query.statuses.is_empty() {
        let codes: Vec<i16> = query.statuses.iter().map(|s| i16::from(*s)).collect();
        builder.push(" AND status = ANY(");
        builder.push_bind(codes);
        builder.push(")");
    }
    if let Some(worker_id) = query.worker_id {
        builder.push(" AND worker_id = ");
        builder.push_bind(worker_id);
    }
}

impl CatalogStore {
    /// Create a task directly in Running with zero progress.
    pub async fn insert_running_task(&self, tx: &mut Tx, task: &NewTask) -> StoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (task_uuid, video_id, worker_id, worker_name, source_path, \
                                dest_path, status, progress, start_time, last_update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, NOW(), NOW()) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.task_uuid)
        .bind(task.video_id)
        .bind(task.worker_id)
        .bind(&task.worker_name)
        .bind(&task.source_path)
        .bind(&task.dest_path)
        .bind(i16::from(TaskStatus::Running))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| crate::StoreError::on_insert(e, "task", &task.task_uuid.to_string()))?;
        Task::try_from(row)
    }

    pub async fn task_by_uuid(&self, task_uuid: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_uuid = $1"
        ))
        .bind(task_uuid)
        .fetch_optional(self.pool())
        .await?;
        row.map(Task::try_from).transpose()
    }

    /// Lock a task row for a lifecycle mutation.
    pub async fn lock_task_by_uuid(
        &self,
        tx: &mut Tx,
        task_uuid: Uuid,
    ) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_uuid = $1 FOR UPDATE"
        ))
        .bind(task_uuid)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Task::try_from).transpose()
    }

    /// Lock a task row by internal id.
    pub async fn lock_task(&self, tx: &mut Tx, id: i64) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Task::try_from).transpose()
    }

    /// Apply an accepted progress report and advance `last_update_time`.
    pub async fn record_task_progress(
        &self,
        tx: &mut Tx,
        id: i64,
        progress: f64,
        elapsed_seconds: Option<i64>,
        remaining_seconds: Option<i64>,
    ) -> StoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET status = $2, progress = $3, \
             elapsed_seconds = COALESCE($4, elapsed_seconds), \
             remaining_seconds = COALESCE($5, remaining_seconds), \
             last_update_time = NOW() \
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(i16::from(TaskStatus::Running))
        .bind(progress.clamp(0.0, 100.0))
        .bind(elapsed_seconds)
        .bind(remaining_seconds)
        .fetch_one(&mut **tx)
        .await?;
        Task::try_from(row)
    }

    /// Terminal success: progress pinned to 100, remaining to zero.
    pub async fn complete_task(
        &self,
        tx: &mut Tx,
        id: i64,
        elapsed_seconds: Option<i64>,
    ) -> StoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET status = $2, progress = 100, end_time = NOW(), \
             remaining_seconds = 0, elapsed_seconds = COALESCE($3, elapsed_seconds), \
             last_update_time = NOW() \
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(i16::from(TaskStatus::Completed))
        .bind(elapsed_seconds)
        .fetch_one(&mut **tx)
        .await?;
        Task::try_from(row)
    }

    /// Terminal failure: remaining cleared, error recorded.
    pub async fn fail_task(
        &self,
        tx: &mut Tx,
        id: i64,
        error_message: &str,
        progress: Option<f64>,
        elapsed_seconds: Option<i64>,
    ) -> StoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET status = $2, end_time = NOW(), remaining_seconds = NULL, \
             error_message = $3, progress = COALESCE($4, progress), \
             elapsed_seconds = COALESCE($5, elapsed_seconds), last_update_time = NOW() \
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(i16::from(TaskStatus::Failed))
        .bind(error_message)
        .bind(progress)
        .bind(elapsed_seconds)
        .fetch_one(&mut **tx)
        .await?;
        Task::try_from(row)
    }

    /// Running tasks whose last update predates `cutoff`. Ids only; the
    /// sweep re-locks and re-checks each row in its own transaction.
    pub async fn stalled_running_task_ids(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM tasks WHERE status = $1 AND last_update_time < $2",
        )
        .bind(i16::from(TaskStatus::Running))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    pub async fn list_tasks(
        &self,
        query: &TaskQuery,
        page: Page,
    ) -> StoreResult<(Vec<Task>, i64)> {
        let mut count_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM tasks");
        push_task_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        push_task_filters(&mut builder, query);
        builder.push(format!(
            " ORDER BY {} {} LIMIT ",
            query.sort_by.as_column(),
            query.order.as_sql()
        ));
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder
            .build_query_as::<TaskRow>()
            .fetch_all(self.pool())
            .await?;
        let tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((tasks, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_sort_keys_are_whitelisted() {
        assert_eq!(
            TaskSortKey::from_param("start_time"),
            Some(TaskSortKey::StartTime)
        );
        assert_eq!(
            TaskSortKey::from_param("progress"),
            Some(TaskSortKey::Progress)
        );
        assert_eq!(TaskSortKey::from_param("worker_name; --"), None);
    }
}
