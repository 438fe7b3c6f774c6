//! Video catalog endpoints (read-only; the scanner owns mutation).

use axum::extract::{Path, State};
use axum_extra::extract::Query;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vconv_models::{TranscodeStatus, Video};
use vconv_store::{VideoQuery, VideoSortKey};

use crate::error::{ApiError, ApiResult};
use crate::handlers::{parse_codes, parse_order};
use crate::response::{ApiResponse, PageData};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub video_id: i64,
    pub path: String,
    pub codec: String,
    pub bitrate_kbps: i32,
    pub width: i32,
    pub height: i32,
    pub total_pixels: i64,
    pub fps: f64,
    pub size_mb: f64,
    pub is_vr: bool,
    pub transcode_status: TranscodeStatus,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mtime: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Video> for VideoResponse {
    fn from(video: Video) -> Self {
        Self {
            video_id: video.id,
            path: video.path,
            codec: video.codec,
            bitrate_kbps: video.bitrate_kbps,
            width: video.width,
            height: video.height,
            total_pixels: video.total_pixels,
            fps: video.fps,
            size_mb: video.size_mb,
            is_vr: video.is_vr,
            transcode_status: video.transcode_status,
            exists: video.exists,
            file_mtime: video.file_mtime,
            updated_at: video.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct VideoListQuery {
    #[serde(default, rename = "transcode_status[]")]
    pub transcode_status: Vec<i16>,
    pub is_vr: Option<bool>,
    #[serde(default, rename = "codec[]")]
    pub codec: Vec<String>,
    pub min_bitrate: Option<i32>,
    pub max_bitrate: Option<i32>,
    pub min_size: Option<f64>,
    pub max_size: Option<f64>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// `GET /api/v1/videos`
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<VideoListQuery>,
) -> ApiResult<ApiResponse<PageData<VideoResponse>>> {
    let transcode_status = parse_codes::<TranscodeStatus>(&query.transcode_status)?;
    let sort_by = match query.sort_by.as_deref() {
        None => VideoSortKey::default(),
        Some(raw) => VideoSortKey::from_param(raw)
            .ok_or_else(|| ApiError::validation(format!("invalid sort_by '{raw}'")))?,
    };
    let order = parse_order(query.order.as_deref())?;
    let page = vconv_store::Page::new(query.page, query.page_size);

    let (videos, total) = state
        .catalog
        .list_videos(
            &VideoQuery {
                transcode_status,
                is_vr: query.is_vr,
                codec: query.codec,
                min_bitrate: query.min_bitrate,
                max_bitrate: query.max_bitrate,
                min_size: query.min_size,
                max_size: query.max_size,
                sort_by,
                order,
            },
            page,
        )
        .await?;
    let items = videos.into_iter().map(VideoResponse::from).collect();
    Ok(ApiResponse::ok(PageData::new(items, total, page)))
}

/// `GET /api/v1/videos/{id}`
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<i64>,
) -> ApiResult<ApiResponse<VideoResponse>> {
    let video = state
        .catalog
        .video_by_id(video_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no video {video_id}")))?;
    Ok(ApiResponse::ok(VideoResponse::from(video)))
}
