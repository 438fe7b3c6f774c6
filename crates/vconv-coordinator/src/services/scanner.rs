//! Scanner: reconcile the filesystem with the video catalog.
//!
//! Runs hourly at minute 5 (and optionally at startup). A scan first
//! tombstones the whole catalog, then walks every root confirming,
//! refreshing or inserting rows; files the walk never reaches stay
//! tombstoned but are never deleted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use vconv_models::{catalog_path_key, classify, is_vr_filename, LogLevel, Video};
use vconv_store::{CatalogStore, NewVideo, VideoMetadata};

use crate::metrics;
use crate::probe::MediaProbe;

/// Minute of the hour the scheduled scan fires at.
pub const SCAN_MINUTE: u32 = 5;

/// Files per commit, bounding transaction duration.
pub const SCAN_BATCH_SIZE: usize = 20;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "flv"];

/// Size slack below which a file counts as unchanged (MB).
const SIZE_TOLERANCE_MB: f64 = 0.1;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanSummary {
    pub files_seen: u64,
    pub inserted: u64,
    pub refreshed: u64,
    pub unchanged: u64,
    pub probe_failures: u64,
    pub tombstones: i64,
}

enum FileOutcome {
    Inserted,
    Refreshed,
    Unchanged,
    ProbeFailed,
}

pub struct Scanner {
    catalog: CatalogStore,
    probe: Arc<dyn MediaProbe>,
    roots: Vec<PathBuf>,
    batch_size: usize,
}

impl Scanner {
    pub fn new(catalog: CatalogStore, probe: Arc<dyn MediaProbe>, roots: Vec<PathBuf>) -> Self {
        Self {
            catalog,
            probe,
            roots,
            batch_size: SCAN_BATCH_SIZE,
        }
    }

    /// Run forever on the hourly schedule.
    pub async fn run_scheduled(self: Arc<Self>) {
        info!(minute = SCAN_MINUTE, "scanner scheduled hourly");
        loop {
            let wait = duration_until_next_scan(Utc::now());
            debug!(seconds = wait.as_secs(), "sleeping until next scan");
            tokio::time::sleep(wait).await;
            if let Err(e) = self.scan().await {
                error!(error = %e, "scheduled scan failed");
                if let Err(log_err) = self
                    .catalog
                    .append_log_direct(None, LogLevel::Error, &format!("scan failed: {e}"))
                    .await
                {
                    error!(error = %log_err, "could not record scan failure");
                }
            }
        }
    }

    /// One full reconciliation pass over every root.
    pub async fn scan(&self) -> anyhow::Result<ScanSummary> {
        info!(roots = self.roots.len(), "starting catalog scan");
        let mut summary = ScanSummary::default();

        self.catalog.mark_all_videos_missing().await?;

        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "scan root missing, skipping");
                continue;
            }
            let files = collect_video_files(root);
            info!(root = %root.display(), files = files.len(), "walking root");

            let mut tx = self.catalog.begin().await?;
            let mut in_batch = 0usize;
            for file in files {
                summary.files_seen += 1;
                match self.reconcile_file(&mut tx, root, &file).await {
                    Ok(FileOutcome::Inserted) => summary.inserted += 1,
                    Ok(FileOutcome::Refreshed) => summary.refreshed += 1,
                    Ok(FileOutcome::Unchanged) => summary.unchanged += 1,
                    Ok(FileOutcome::ProbeFailed) => summary.probe_failures += 1,
                    Err(e) => {
                        // Store faults abort the scan; the open batch rolls back
                        return Err(e);
                    }
                }
                in_batch += 1;
                if in_batch >= self.batch_size {
                    tx.commit().await?;
                    tx = self.catalog.begin().await?;
                    in_batch = 0;
                }
            }
            tx.commit().await?;
        }

        summary.tombstones = self.catalog.missing_video_count().await?;
        if summary.tombstones > 0 {
            warn!(count = summary.tombstones, "cataloged files no longer on disk");
        }
        info!(
            seen = summary.files_seen,
            inserted = summary.inserted,
            refreshed = summary.refreshed,
            unchanged = summary.unchanged,
            probe_failures = summary.probe_failures,
            "catalog scan complete"
        );
        metrics::record_scan(&summary);
        Ok(summary)
    }

    /// Reconcile one file against the catalog inside the batch transaction.
    async fn reconcile_file(
        &self,
        tx: &mut vconv_store::Tx,
        root: &Path,
        file: &Path,
    ) -> anyhow::Result<FileOutcome> {
        let Some(key) = catalog_path_key(root, file) else {
            warn!(file = %file.display(), "file escapes its scan root, skipping");
            return Ok(FileOutcome::ProbeFailed);
        };
        let stat = std::fs::metadata(file)?;
        let size_mb = stat.len() as f64 / (1024.0 * 1024.0);
        let mtime: DateTime<Utc> = stat.modified()?.into();

        match self.catalog.lock_video_by_path(tx, &key).await? {
            Some(existing) => {
                if !file_changed(&existing, size_mb, mtime) {
                    self.catalog.mark_video_present(tx, existing.id).await?;
                    return Ok(FileOutcome::Unchanged);
                }
                let info = match self.probe.probe(file).await {
                    Ok(info) => info,
                    Err(e) => return self.log_probe_failure(tx, file, &e).await,
                };
                let status = classify(
                    &info.codec,
                    info.bitrate_kbps,
                    info.width,
                    info.height,
                    info.fps,
                    existing.is_vr,
                );
                let meta = metadata_from(info, size_mb, mtime);
                self.catalog
                    .refresh_video_metadata(tx, existing.id, &meta, status)
                    .await?;
                info!(path = %key, status = %status, "refreshed changed video");
                Ok(FileOutcome::Refreshed)
            }
            None => {
                let info = match self.probe.probe(file).await {
                    Ok(info) => info,
                    Err(e) => return self.log_probe_failure(tx, file, &e).await,
                };
                let file_name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let is_vr = is_vr_filename(&file_name);
                let status = classify(
                    &info.codec,
                    info.bitrate_kbps,
                    info.width,
                    info.height,
                    info.fps,
                    is_vr,
                );
                let meta = metadata_from(info, size_mb, mtime);
                self.catalog
                    .insert_video(
                        tx,
                        &NewVideo {
                            path: key.clone(),
                            is_vr,
                            metadata: meta,
                            transcode_status: status,
                        },
                    )
                    .await?;
                info!(path = %key, status = %status, vr = is_vr, "cataloged new video");
                Ok(FileOutcome::Inserted)
            }
        }
    }

    /// A probe failure skips the file, never the scan.
    async fn log_probe_failure(
        &self,
        tx: &mut vconv_store::Tx,
        file: &Path,
        error: &crate::probe::ProbeError,
    ) -> anyhow::Result<FileOutcome> {
        warn!(file = %file.display(), error = %error, "probe failed, skipping file");
        self.catalog
            .append_log(
                tx,
                None,
                LogLevel::Error,
                &format!("probe failed for {}: {error}", file.display()),
            )
            .await?;
        Ok(FileOutcome::ProbeFailed)
    }
}

fn metadata_from(info: vconv_models::MediaInfo, size_mb: f64, mtime: DateTime<Utc>) -> VideoMetadata {
    VideoMetadata {
        codec: info.codec,
        bitrate_kbps: info.bitrate_kbps,
        width: info.width,
        height: info.height,
        fps: info.fps,
        size_mb,
        file_mtime: mtime,
    }
}

/// Walk one root for candidate video files, skipping trailers.
fn collect_video_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "directory walk error");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_candidate_file(path))
        .collect()
}

/// Extension and trailer filter for scan candidates.
fn is_candidate_file(path: &Path) -> bool {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !VIDEO_EXTENSIONS.contains(&extension.to_lowercase().as_str()) {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.to_lowercase().contains("-trailer")
}

/// Unchanged means size within tolerance and mtime not newer than stored.
fn file_changed(existing: &Video, size_mb: f64, mtime: DateTime<Utc>) -> bool {
    if (size_mb - existing.size_mb).abs() > SIZE_TOLERANCE_MB {
        return true;
    }
    match existing.file_mtime {
        Some(stored) => mtime > stored,
        None => true,
    }
}

/// Time to sleep until the next minute-5 boundary.
fn duration_until_next_scan(now: DateTime<Utc>) -> Duration {
    let next = next_scan_time(now);
    (next - now).to_std().unwrap_or(Duration::from_secs(0))
}

fn next_scan_time(now: DateTime<Utc>) -> DateTime<Utc> {
    let this_hour = now
        .with_minute(SCAN_MINUTE)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("minute 5 is always valid");
    if this_hour > now {
        this_hour
    } else {
        this_hour + chrono::Duration::hours(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn video(size_mb: f64, mtime: Option<DateTime<Utc>>) -> Video {
        Video {
            id: 1,
            path: "/movies/a.mp4".into(),
            codec: "h264".into(),
            bitrate_kbps: 8_000,
            width: 1920,
            height: 1080,
            total_pixels: 2_073_600,
            fps: 30.0,
            size_mb,
            is_vr: false,
            file_mtime: mtime,
            updated_at: Utc::now(),
            exists: true,
            transcode_status: vconv_models::TranscodeStatus::Wait,
            current_task_id: None,
        }
    }

    #[test]
    fn test_candidate_extensions() {
        assert!(is_candidate_file(Path::new("/m/a.mp4")));
        assert!(is_candidate_file(Path::new("/m/a.MKV")));
        assert!(is_candidate_file(Path::new("/m/a.avi")));
        assert!(is_candidate_file(Path::new("/m/a.flv")));
        assert!(!is_candidate_file(Path::new("/m/a.srt")));
        assert!(!is_candidate_file(Path::new("/m/a")));
    }

    #[test]
    fn test_trailers_are_skipped() {
        assert!(!is_candidate_file(Path::new("/m/movie-trailer.mp4")));
        assert!(!is_candidate_file(Path::new("/m/Movie-TRAILER.mkv")));
        assert!(is_candidate_file(Path::new("/m/trailer-park-story.mp4")));
    }

    #[test]
    fn test_unchanged_file_within_tolerance() {
        let now = Utc::now();
        let existing = video(700.0, Some(now));
        assert!(!file_changed(&existing, 700.05, now));
        assert!(!file_changed(&existing, 700.0, now - chrono::Duration::hours(1)));
    }

    #[test]
    fn test_size_drift_is_a_change() {
        let now = Utc::now();
        let existing = video(700.0, Some(now));
        assert!(file_changed(&existing, 700.2, now));
        assert!(file_changed(&existing, 699.0, now));
    }

    #[test]
    fn test_newer_mtime_is_a_change() {
        let then = Utc::now() - chrono::Duration::hours(2);
        let existing = video(700.0, Some(then));
        assert!(file_changed(&existing, 700.0, Utc::now()));
    }

    #[test]
    fn test_missing_stored_mtime_is_a_change() {
        let existing = video(700.0, None);
        assert!(file_changed(&existing, 700.0, Utc::now()));
    }

    #[test]
    fn test_next_scan_before_minute_five() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 2, 30).unwrap();
        let next = next_scan_time(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_next_scan_after_minute_five() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        let next = next_scan_time(now);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 11, 5, 0).unwrap());
    }

    #[test]
    fn test_walk_finds_nested_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("series/season1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(nested.join("b.mkv"), b"x").unwrap();
        std::fs::write(nested.join("b-trailer.mkv"), b"x").unwrap();
        std::fs::write(nested.join("notes.txt"), b"x").unwrap();

        let mut files = collect_video_files(dir.path());
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.mp4"));
        assert!(files[1].ends_with("b.mkv"));
    }
}
