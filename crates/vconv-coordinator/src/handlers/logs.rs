//! Audit log endpoints.

use axum::extract::State;
use axum::Json;
use axum_extra::extract::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use vconv_models::{LogEntry, LogLevel};
use vconv_store::LogQuery;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{parse_codes, parse_order};
use crate::response::{ApiResponse, PageData};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub log_id: i64,
    /// Internal task row id; absent for scan-level entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    pub log_time: DateTime<Utc>,
    pub log_level: LogLevel,
    pub log_message: String,
}

impl From<LogEntry> for LogResponse {
    fn from(entry: LogEntry) -> Self {
        Self {
            log_id: entry.id,
            task_id: entry.task_id,
            log_time: entry.log_time,
            log_level: entry.level,
            log_message: entry.message,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LogListQuery {
    #[serde(default, rename = "log_level[]")]
    pub log_level: Vec<i16>,
    /// Filter by external task id
    pub task_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// `GET /api/v1/logs`
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogListQuery>,
) -> ApiResult<ApiResponse<PageData<LogResponse>>> {
    let levels = parse_codes::<LogLevel>(&query.log_level)?;
    let order = parse_order(query.order.as_deref())?;
    let page = vconv_store::Page::new(query.page, query.page_size);

    let task_id = match &query.task_id {
        None => None,
        Some(raw) => Some(resolve_task_id(&state, raw).await?),
    };

    let (entries, total) = state
        .catalog
        .list_logs(
            &LogQuery {
                levels,
                task_id,
                start_time: query.start_time,
                end_time: query.end_time,
                order,
            },
            page,
        )
        .await?;
    let items = entries.into_iter().map(LogResponse::from).collect();
    Ok(ApiResponse::ok(PageData::new(items, total, page)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLogRequest {
    /// External task id this entry belongs to, when any
    #[serde(default)]
    pub task_id: Option<String>,
    pub log_level: i16,
    #[validate(length(min = 1, max = 1023))]
    pub log_message: String,
}

/// `POST /api/v1/logs`: workers push audit lines for their task.
pub async fn create_log(
    State(state): State<AppState>,
    Json(request): Json<CreateLogRequest>,
) -> ApiResult<ApiResponse<LogResponse>> {
    request
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let level = LogLevel::try_from(request.log_level)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let task_id = match &request.task_id {
        None => None,
        Some(raw) => Some(resolve_task_id(&state, raw).await?),
    };

    let entry = state
        .catalog
        .append_log_direct(task_id, level, &request.log_message)
        .await?;
    Ok(ApiResponse::created(LogResponse::from(entry)))
}

/// Map an external task uuid onto its internal row id.
async fn resolve_task_id(state: &AppState, raw: &str) -> ApiResult<i64> {
    let task_uuid = Uuid::parse_str(raw)
        .map_err(|_| ApiError::validation(format!("invalid task id '{raw}'")))?;
    let task = state
        .catalog
        .task_by_uuid(task_uuid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no task {task_uuid}")))?;
    Ok(task.id)
}
