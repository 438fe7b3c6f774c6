//! Worker fleet endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use vconv_models::{OfflineMode, Worker, WorkerKind, WorkerStatus};

use crate::error::{ApiError, ApiResult};
use crate::handlers::Paging;
use crate::response::{ApiResponse, PageData};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkerRequest {
    #[validate(length(min = 1, max = 255))]
    pub worker_name: String,
    pub worker_type: i16,
    pub support_vr: bool,
}

#[derive(Debug, Serialize)]
pub struct WorkerCreated {
    pub worker_id: i64,
}

#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub worker_id: i64,
    pub worker_name: String,
    pub worker_type: WorkerKind,
    pub support_vr: bool,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl WorkerResponse {
    /// Render a worker with its status derived from heartbeat age, so a
    /// silent worker reads as Offline even before the sweep has run.
    fn derived(worker: Worker, heartbeat_timeout: chrono::Duration) -> Self {
        let status = if worker.status != WorkerStatus::Offline
            && worker.heartbeat_expired(Utc::now(), heartbeat_timeout)
        {
            WorkerStatus::Offline
        } else {
            worker.status
        };
        Self {
            worker_id: worker.id,
            worker_name: worker.name,
            worker_type: worker.kind,
            support_vr: worker.supports_vr,
            status,
            last_heartbeat: worker.last_heartbeat,
        }
    }
}

/// `POST /api/v1/workers`
pub async fn create_worker(
    State(state): State<AppState>,
    Json(request): Json<CreateWorkerRequest>,
) -> ApiResult<ApiResponse<WorkerCreated>> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let kind = WorkerKind::try_from(request.worker_type)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let worker = state
        .registry
        .register(&request.worker_name, kind, request.support_vr)
        .await?;
    Ok(ApiResponse::created(WorkerCreated {
        worker_id: worker.id,
    })
    .with_message("registered"))
}

/// `GET /api/v1/workers`
pub async fn list_workers(
    State(state): State<AppState>,
    Query(paging): Query<Paging>,
) -> ApiResult<ApiResponse<PageData<WorkerResponse>>> {
    let page = paging.to_page();
    let (workers, total) = state.catalog.list_workers(page).await?;
    let timeout = state.config.heartbeat_timeout();
    let items = workers
        .into_iter()
        .map(|w| WorkerResponse::derived(w, timeout))
        .collect();
    Ok(ApiResponse::ok(PageData::new(items, total, page)))
}

/// `GET /api/v1/workers/{id}`
pub async fn get_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<i64>,
) -> ApiResult<ApiResponse<WorkerResponse>> {
    let worker = state
        .catalog
        .worker_by_id(worker_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no worker {worker_id}")))?;
    Ok(ApiResponse::ok(WorkerResponse::derived(
        worker,
        state.config.heartbeat_timeout(),
    )))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateWorkerRequest {
    #[validate(length(min = 1, max = 255))]
    pub worker_name: Option<String>,
    pub worker_type: Option<i16>,
    pub support_vr: Option<bool>,
}

/// `PUT /api/v1/workers/{id}`
pub async fn update_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<i64>,
    Json(request): Json<UpdateWorkerRequest>,
) -> ApiResult<ApiResponse<()>> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let kind = request
        .worker_type
        .map(WorkerKind::try_from)
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let found = state
        .catalog
        .update_worker(
            worker_id,
            request.worker_name.as_deref(),
            kind,
            request.support_vr,
        )
        .await?;
    if !found {
        return Err(ApiError::not_found(format!("no worker {worker_id}")));
    }
    Ok(ApiResponse::message("updated"))
}

/// `DELETE /api/v1/workers/{id}`
pub async fn delete_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<i64>,
) -> ApiResult<ApiResponse<()>> {
    let found = state.catalog.delete_worker(worker_id).await?;
    if !found {
        return Err(ApiError::not_found(format!("no worker {worker_id}")));
    }
    Ok(ApiResponse::message("deleted"))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: i64,
    pub worker_name: String,
}

/// `POST /api/v1/workers/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<ApiResponse<()>> {
    state
        .registry
        .heartbeat(request.worker_id, &request.worker_name)
        .await?;
    Ok(ApiResponse::message("heartbeat recorded"))
}

#[derive(Debug, Deserialize)]
pub struct OfflineRequest {
    pub action: String,
}

/// `POST /api/v1/workers/{id}/offline`
pub async fn request_offline(
    State(state): State<AppState>,
    Path(worker_id): Path<i64>,
    Json(request): Json<OfflineRequest>,
) -> ApiResult<ApiResponse<()>> {
    let mode = OfflineMode::from_action(&request.action)
        .ok_or_else(|| ApiError::validation(format!("invalid action '{}'", request.action)))?;
    state.registry.request_offline(worker_id, mode).await?;
    Ok(ApiResponse::message("offline requested"))
}

/// `DELETE /api/v1/workers/{id}/offline`
pub async fn cancel_offline(
    State(state): State<AppState>,
    Path(worker_id): Path<i64>,
) -> ApiResult<ApiResponse<()>> {
    state.registry.cancel_offline(worker_id).await?;
    Ok(ApiResponse::message("offline request cancelled"))
}
