//! Shared data models for the vconv transcoding coordinator.
//!
//! This crate provides Serde-serializable types for:
//! - Catalog entities (videos, tasks, workers, log entries)
//! - Status enums and their numeric wire codes
//! - Transcode classification (bitrate targets)
//! - VR detection from filenames
//! - Canonical catalog path keys
//! - Realtime channel message schemas (ws.rs)
//! - Media probe results

pub mod log;
pub mod path_key;
pub mod probe;
pub mod task;
pub mod video;
pub mod vr;
pub mod worker;
pub mod ws;

// Re-export common types
pub use log::{LogEntry, LogLevel};
pub use path_key::catalog_path_key;
pub use probe::MediaInfo;
pub use task::{Task, TaskDescriptor, TaskStatus};
pub use video::{classify, target_bitrate_kbps, TranscodeStatus, Video};
pub use vr::is_vr_filename;
pub use worker::{OfflineMode, Worker, WorkerKind, WorkerStatus};
pub use ws::{ClientOp, RoomUpdate, ServerPush, TASKS_ROOM};

/// Error returned when a numeric wire code does not map to a known variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind} code: {code}")]
pub struct InvalidCode {
    pub kind: &'static str,
    pub code: i16,
}

impl InvalidCode {
    pub(crate) fn new(kind: &'static str, code: i16) -> Self {
        Self { kind, code }
    }
}
