//! Task endpoints: dispatch pulls, listings and worker progress reports.

use axum::extract::{Path, State};
use axum::Json;
use axum_extra::extract::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use vconv_models::{Task, TaskStatus, WorkerKind};
use vconv_store::{TaskQuery, TaskSortKey};

use crate::error::{ApiError, ApiResult};
use crate::handlers::{parse_codes, parse_order};
use crate::response::{ApiResponse, PageData};
use crate::services::{DispatchOutcome, DispatchRequest, TaskUpdate};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub worker_id: i64,
    pub worker_type: i16,
    pub support_vr: bool,
    #[serde(default)]
    pub dest_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskAssigned {
    pub task_id: Uuid,
    pub video_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task_id: Uuid,
    pub video_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    pub worker_id: i64,
    pub worker_name: String,
    pub status: TaskStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub elapsed_time: i64,
    pub remaining_time: Option<i64>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub last_update_time: DateTime<Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_uuid,
            video_path: task.source_path,
            dest_path: task.dest_path,
            worker_id: task.worker_id,
            worker_name: task.worker_name,
            status: task.status,
            progress: task.progress,
            error_message: task.error_message,
            elapsed_time: task.elapsed_seconds,
            remaining_time: task.remaining_seconds,
            start_time: task.start_time,
            end_time: task.end_time,
            last_update_time: task.last_update_time,
        }
    }
}

/// `POST /api/v1/tasks`: a worker pulls for work.
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<ApiResponse<TaskAssigned>> {
    let kind = WorkerKind::try_from(request.worker_type)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let outcome = state
        .dispatcher
        .dispatch(DispatchRequest {
            worker_id: request.worker_id,
            kind,
            supports_vr: request.support_vr,
            dest_path: request.dest_path,
        })
        .await?;

    match outcome {
        DispatchOutcome::Assigned(task) => Ok(ApiResponse::created(TaskAssigned {
            task_id: task.task_uuid,
            video_path: task.source_path,
            dest_path: task.dest_path,
        })
        .with_message("task created")),
        DispatchOutcome::NoCandidate => {
            Err(ApiError::not_found("no videos waiting for transcode"))
        }
        DispatchOutcome::OfflineRequested(mode) => Err(ApiError::OfflineRequested(mode)),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TaskListQuery {
    #[serde(default, rename = "status[]")]
    pub status: Vec<i16>,
    pub worker_id: Option<i64>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// `GET /api/v1/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<ApiResponse<PageData<TaskResponse>>> {
    let statuses = parse_codes::<TaskStatus>(&query.status)?;
    let sort_by = match query.sort_by.as_deref() {
        None => TaskSortKey::default(),
        Some(raw) => TaskSortKey::from_param(raw)
            .ok_or_else(|| ApiError::validation(format!("invalid sort_by '{raw}'")))?,
    };
    let order = parse_order(query.order.as_deref())?;
    let page = vconv_store::Page::new(query.page, query.page_size);

    let (tasks, total) = state
        .catalog
        .list_tasks(
            &TaskQuery {
                statuses,
                worker_id: query.worker_id,
                sort_by,
                order,
            },
            page,
        )
        .await?;
    let items = tasks.into_iter().map(TaskResponse::from).collect();
    Ok(ApiResponse::ok(PageData::new(items, total, page)))
}

fn parse_task_uuid(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::validation(format!("invalid task id '{raw}'")))
}

/// `GET /api/v1/tasks/{task_id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<ApiResponse<TaskResponse>> {
    let task_uuid = parse_task_uuid(&task_id)?;
    let task = state
        .catalog
        .task_by_uuid(task_uuid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no task {task_uuid}")))?;
    Ok(ApiResponse::ok(TaskResponse::from(task)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaskUpdateRequest {
    pub worker_id: i64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub progress: f64,
    pub status: i16,
    #[serde(default)]
    pub elapsed_time: Option<i64>,
    #[serde(default)]
    pub remaining_time: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `PATCH /api/v1/tasks/{task_id}`: worker progress report.
pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(request): Json<TaskUpdateRequest>,
) -> ApiResult<ApiResponse<TaskResponse>> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let task_uuid = parse_task_uuid(&task_id)?;
    let status = TaskStatus::try_from(request.status)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let task = state
        .tracker
        .apply_update(
            task_uuid,
            TaskUpdate {
                worker_id: request.worker_id,
                progress: request.progress,
                status,
                elapsed_time: request.elapsed_time,
                remaining_time: request.remaining_time,
                error_message: request.error_message,
            },
        )
        .await?;
    Ok(ApiResponse::ok(TaskResponse::from(task)).with_message("updated"))
}
