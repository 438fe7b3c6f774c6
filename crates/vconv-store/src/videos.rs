//! Video catalog repository.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use vconv_models::{TranscodeStatus, Video, WorkerKind};

use crate::{CatalogStore, SortOrder, StoreResult, Page, Tx};

/// Hardware encoders only take candidates up to mod-16-padded 1080p.
pub const MAX_HW_PIXELS: i64 = 1920 * 1080 + 1920 * 8;
/// Hardware encoders only take candidates at common frame rates.
pub const MAX_HW_FPS: f64 = 31.0;

const VIDEO_COLUMNS: &str = "id, path, codec, bitrate_kbps, width, height, total_pixels, fps, \
                             size_mb, is_vr, file_mtime, updated_at, present, transcode_status, \
                             current_task_id";

#[derive(Debug, FromRow)]
struct VideoRow {
    id: i64,
    path: String,
    codec: String,
    bitrate_kbps: i32,
    width: i32,
    height: i32,
    total_pixels: i64,
    fps: f64,
    size_mb: f64,
    is_vr: bool,
    file_mtime: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    present: bool,
    transcode_status: i16,
    current_task_id: Option<i64>,
}

impl TryFrom<VideoRow> for Video {
    type Error = crate::StoreError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        Ok(Video {
            id: row.id,
            path: row.path,
            codec: row.codec,
            bitrate_kbps: row.bitrate_kbps,
            width: row.width,
            height: row.height,
            total_pixels: row.total_pixels,
            fps: row.fps,
            size_mb: row.size_mb,
            is_vr: row.is_vr,
            file_mtime: row.file_mtime,
            updated_at: row.updated_at,
            exists: row.present,
            transcode_status: TranscodeStatus::try_from(row.transcode_status)?,
            current_task_id: row.current_task_id,
        })
    }
}

/// Probe-derived fields written on insert and refresh.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub codec: String,
    pub bitrate_kbps: i32,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub size_mb: f64,
    pub file_mtime: DateTime<Utc>,
}

impl VideoMetadata {
    pub fn total_pixels(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }
}

/// A video sighted for the first time.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub path: String,
    pub is_vr: bool,
    pub metadata: VideoMetadata,
    pub transcode_status: TranscodeStatus,
}

/// Dispatch candidate constraints, derived from the requesting worker.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFilter {
    /// Statuses the worker may pick up
    pub statuses: Vec<TranscodeStatus>,
    /// VR pool membership must match exactly
    pub is_vr: bool,
    /// Present iff the worker is a hardware encoder: (max pixels, max fps)
    pub hardware_ceiling: Option<(i64, f64)>,
}

impl CandidateFilter {
    /// Capability rules for one requesting worker.
    ///
    /// CPU/QSV retry prior failures; NVENC/VPU take fresh waiters only and
    /// are further restricted to easy h264 sources. VR is only honored for
    /// CPU workers.
    pub fn for_worker(kind: WorkerKind, supports_vr: bool) -> Self {
        let statuses = if kind.retries_failures() {
            vec![TranscodeStatus::Wait, TranscodeStatus::Failed]
        } else {
            vec![TranscodeStatus::Wait]
        };
        let hardware_ceiling = kind
            .is_hardware()
            .then_some((MAX_HW_PIXELS, MAX_HW_FPS));
        Self {
            statuses,
            is_vr: kind.effective_vr(supports_vr),
            hardware_ceiling,
        }
    }

    fn status_codes(&self) -> Vec<i16> {
        self.statuses.iter().map(|s| i16::from(*s)).collect()
    }
}

/// Filters for `GET /videos`.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub transcode_status: Vec<TranscodeStatus>,
    pub is_vr: Option<bool>,
    pub codec: Vec<String>,
    pub min_bitrate: Option<i32>,
    pub max_bitrate: Option<i32>,
    pub min_size: Option<f64>,
    pub max_size: Option<f64>,
    pub sort_by: VideoSortKey,
    pub order: SortOrder,
}

/// Whitelisted sort columns for video listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoSortKey {
    #[default]
    UpdatedAt,
    Path,
    Bitrate,
    Size,
    Fps,
}

impl VideoSortKey {
    pub fn from_param(param: &str) -> Option<Self> {
        match param {
            "updated_at" => Some(Self::UpdatedAt),
            "path" => Some(Self::Path),
            "bitrate" | "bitrate_kbps" => Some(Self::Bitrate),
            "size" | "size_mb" => Some(Self::Size),
            "fps" => Some(Self::Fps),
            _ => None,
        }
    }

    fn as_column(&self) -> &'static str {
        match self {
            Self::UpdatedAt => "updated_at",
            Self::Path => "path",
            Self::Bitrate => "bitrate_kbps",
            Self::Size => "size_mb",
            Self::Fps => "fps",
        }
    }
}

fn push_video_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &VideoQuery) {
    builder.push(" WHERE TRUE");
    if !query.transcode_status.is_empty() {
        let codes: Vec<i16> = query.transcode_status.iter().map(|s| i16::from(*s)).collect();
        builder.push(" AND transcode_status = ANY(");
        builder.push_bind(codes);
        builder.push(")");
    }
    if let Some(is_vr) = query.is_vr {
        builder.push(" AND is_vr = ");
        builder.push_bind(is_vr);
    }
    if !query.codec.is_empty() {
        builder.push(" AND codec = ANY(");
        builder.push_bind(query.codec.clone());
        builder.push(")");
    }
    if let Some(min) = query.min_bitrate {
        builder.push(" AND bitrate_kbps >= ");
        builder.push_bind(min);
    }
    if let Some(max) = query.max_bitrate {
        builder.push(" AND bitrate_kbps <= ");
        builder.push_bind(max);
    }
    if let Some(min) = query.min_size {
        builder.push(" AND size_mb >= ");
        builder.push_bind(min);
    }
    if let Some(max) = query.max_size {
        builder.push(" AND size_mb <= ");
        builder.push_bind(max);
    }
}

impl CatalogStore {
    /// Tentatively tombstone the whole catalog at the start of a scan.
    pub async fn mark_all_videos_missing(&self) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE videos SET present = FALSE")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn video_by_id(&self, id: i64) -> StoreResult<Option<Video>> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Video::try_from).transpose()
    }

    /// Look up a catalog row by path key under a row lock.
    pub async fn lock_video_by_path(&self, tx: &mut Tx, path: &str) -> StoreResult<Option<Video>> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE path = $1 FOR UPDATE"
        ))
        .bind(path)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Video::try_from).transpose()
    }

    /// Lock one video row by id.
    pub async fn lock_video(&self, tx: &mut Tx, id: i64) -> StoreResult<Option<Video>> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Video::try_from).transpose()
    }

    pub async fn insert_video(&self, tx: &mut Tx, video: &NewVideo) -> StoreResult<Video> {
        let meta = &video.metadata;
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "INSERT INTO videos (path, codec, bitrate_kbps, width, height, total_pixels, fps, \
                                 size_mb, is_vr, file_mtime, updated_at, present, transcode_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), TRUE, $11) \
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(&video.path)
        .bind(&meta.codec)
        .bind(meta.bitrate_kbps)
        .bind(meta.width)
        .bind(meta.height)
        .bind(meta.total_pixels())
        .bind(meta.fps)
        .bind(meta.size_mb)
        .bind(video.is_vr)
        .bind(meta.file_mtime)
        .bind(i16::from(video.transcode_status))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| crate::StoreError::on_insert(e, "video", &video.path))?;
        Video::try_from(row)
    }

    /// Confirm an unchanged file still exists.
    pub async fn mark_video_present(&self, tx: &mut Tx, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE videos SET present = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Re-probe result for a changed file: refresh metadata and reset the
    /// transcode status to the new classification.
    pub async fn refresh_video_metadata(
        &self,
        tx: &mut Tx,
        id: i64,
        meta: &VideoMetadata,
        status: TranscodeStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE videos SET codec = $2, bitrate_kbps = $3, width = $4, height = $5, \
             total_pixels = $6, fps = $7, size_mb = $8, file_mtime = $9, \
             transcode_status = $10, present = TRUE, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&meta.codec)
        .bind(meta.bitrate_kbps)
        .bind(meta.width)
        .bind(meta.height)
        .bind(meta.total_pixels())
        .bind(meta.fps)
        .bind(meta.size_mb)
        .bind(meta.file_mtime)
        .bind(i16::from(status))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Select and lock the best dispatch candidate for a worker.
    ///
    /// Worst bitrate offenders go first. `SKIP LOCKED` lets concurrent
    /// dispatchers race without ever handing out the same row.
    pub async fn claim_candidate(
        &self,
        tx: &mut Tx,
        filter: &CandidateFilter,
    ) -> StoreResult<Option<Video>> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE present = TRUE"));
        builder.push(" AND transcode_status = ANY(");
        builder.push_bind(filter.status_codes());
        builder.push(")");
        builder.push(" AND is_vr = ");
        builder.push_bind(filter.is_vr);
        if let Some((max_pixels, max_fps)) = filter.hardware_ceiling {
            builder.push(" AND codec = 'h264' AND total_pixels <= ");
            builder.push_bind(max_pixels);
            builder.push(" AND fps <= ");
            builder.push_bind(max_fps);
        }
        builder.push(" ORDER BY bitrate_kbps DESC LIMIT 1 FOR UPDATE SKIP LOCKED");

        let row = builder
            .build_query_as::<VideoRow>()
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Video::try_from).transpose()
    }

    /// Link a freshly created task: status Created plus back-reference.
    pub async fn set_video_dispatched(
        &self,
        tx: &mut Tx,
        id: i64,
        task_id: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE videos SET transcode_status = $2, current_task_id = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(TranscodeStatus::Created))
        .bind(task_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// First accepted progress report moves the video to Running.
    pub async fn set_video_running(&self, tx: &mut Tx, id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE videos SET transcode_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(TranscodeStatus::Running))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Terminal outcome: set Completed/Failed and drop the back-reference.
    pub async fn set_video_terminal(
        &self,
        tx: &mut Tx,
        id: i64,
        status: TranscodeStatus,
    ) -> StoreResult<()> {
        debug_assert!(matches!(
            status,
            TranscodeStatus::Completed | TranscodeStatus::Failed
        ));
        sqlx::query(
            "UPDATE videos SET transcode_status = $2, current_task_id = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(status))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn list_videos(
        &self,
        query: &VideoQuery,
        page: Page,
    ) -> StoreResult<(Vec<Video>, i64)> {
        let mut count_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM videos");
        push_video_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {VIDEO_COLUMNS} FROM videos"));
        push_video_filters(&mut builder, query);
        builder.push(format!(
            " ORDER BY {} {} LIMIT ",
            query.sort_by.as_column(),
            query.order.as_sql()
        ));
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder
            .build_query_as::<VideoRow>()
            .fetch_all(self.pool())
            .await?;
        let videos = rows
            .into_iter()
            .map(Video::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((videos, total))
    }

    /// Tombstone count after a scan, for the summary log line.
    pub async fn missing_video_count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE present = FALSE")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_filter_retries_failures_and_honors_vr() {
        let filter = CandidateFilter::for_worker(WorkerKind::Cpu, true);
        assert_eq!(
            filter.statuses,
            vec![TranscodeStatus::Wait, TranscodeStatus::Failed]
        );
        assert!(filter.is_vr);
        assert!(filter.hardware_ceiling.is_none());
    }

    #[test]
    fn test_qsv_filter_retries_but_is_hardware_limited() {
        let filter = CandidateFilter::for_worker(WorkerKind::Qsv, false);
        assert_eq!(
            filter.statuses,
            vec![TranscodeStatus::Wait, TranscodeStatus::Failed]
        );
        assert_eq!(filter.hardware_ceiling, Some((MAX_HW_PIXELS, MAX_HW_FPS)));
    }

    #[test]
    fn test_nvenc_filter_takes_fresh_easy_work_only() {
        let filter = CandidateFilter::for_worker(WorkerKind::Nvenc, true);
        assert_eq!(filter.statuses, vec![TranscodeStatus::Wait]);
        // VR flag is ignored for hardware encoders
        assert!(!filter.is_vr);
        assert_eq!(filter.hardware_ceiling, Some((MAX_HW_PIXELS, MAX_HW_FPS)));
    }

    #[test]
    fn test_hw_ceiling_admits_padded_1080p() {
        assert!(1920 * 1088 <= MAX_HW_PIXELS);
        assert!(2560 * 1440 > MAX_HW_PIXELS);
    }

    #[test]
    fn test_video_sort_keys_are_whitelisted() {
        assert_eq!(VideoSortKey::from_param("bitrate"), Some(VideoSortKey::Bitrate));
        assert_eq!(VideoSortKey::from_param("path"), Some(VideoSortKey::Path));
        assert_eq!(VideoSortKey::from_param("id; DROP TABLE videos"), None);
    }
}
