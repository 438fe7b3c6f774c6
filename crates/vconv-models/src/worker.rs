//! Fleet workers and their capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InvalidCode;

/// Encoder class a worker advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum WorkerKind {
    /// Software x265; handles everything including VR and retries
    Cpu,
    /// NVIDIA hardware encoder
    Nvenc,
    /// Intel Quick Sync
    Qsv,
    /// Dedicated video processing unit
    Vpu,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Cpu => "cpu",
            WorkerKind::Nvenc => "nvenc",
            WorkerKind::Qsv => "qsv",
            WorkerKind::Vpu => "vpu",
        }
    }

    /// Hardware encoders only take easy candidates (h264, <=1080p, <=31 fps).
    pub fn is_hardware(&self) -> bool {
        !matches!(self, WorkerKind::Cpu)
    }

    /// CPU and QSV workers may pick up previously failed videos.
    pub fn retries_failures(&self) -> bool {
        matches!(self, WorkerKind::Cpu | WorkerKind::Qsv)
    }

    /// VR support is only honored on CPU workers.
    pub fn effective_vr(&self, supports_vr: bool) -> bool {
        supports_vr && matches!(self, WorkerKind::Cpu)
    }
}

impl From<WorkerKind> for i16 {
    fn from(kind: WorkerKind) -> i16 {
        match kind {
            WorkerKind::Cpu => 0,
            WorkerKind::Nvenc => 1,
            WorkerKind::Qsv => 2,
            WorkerKind::Vpu => 3,
        }
    }
}

impl TryFrom<i16> for WorkerKind {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(WorkerKind::Cpu),
            1 => Ok(WorkerKind::Nvenc),
            2 => Ok(WorkerKind::Qsv),
            3 => Ok(WorkerKind::Vpu),
            other => Err(InvalidCode::new("worker_type", other)),
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observed state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i16", try_from = "i16")]
pub enum WorkerStatus {
    #[default]
    Offline,
    Idle,
    Busy,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Offline => "offline",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Failed => "failed",
        }
    }
}

impl From<WorkerStatus> for i16 {
    fn from(status: WorkerStatus) -> i16 {
        match status {
            WorkerStatus::Offline => 0,
            WorkerStatus::Idle => 1,
            WorkerStatus::Busy => 2,
            WorkerStatus::Failed => 3,
        }
    }
}

impl TryFrom<i16> for WorkerStatus {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(WorkerStatus::Offline),
            1 => Ok(WorkerStatus::Idle),
            2 => Ok(WorkerStatus::Busy),
            3 => Ok(WorkerStatus::Failed),
            other => Err(InvalidCode::new("worker_status", other)),
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operator-requested retirement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i16", try_from = "i16")]
pub enum OfflineMode {
    #[default]
    None,
    /// Finish nothing new, stay registered
    SoftOffline,
    /// Finish nothing new and exit
    Shutdown,
}

impl OfflineMode {
    /// The `action` string carried in offline requests and 205 responses.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            OfflineMode::None => None,
            OfflineMode::SoftOffline => Some("offline"),
            OfflineMode::Shutdown => Some("shutdown"),
        }
    }

    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "offline" => Some(OfflineMode::SoftOffline),
            "shutdown" => Some(OfflineMode::Shutdown),
            _ => None,
        }
    }
}

impl From<OfflineMode> for i16 {
    fn from(mode: OfflineMode) -> i16 {
        match mode {
            OfflineMode::None => 0,
            OfflineMode::SoftOffline => 1,
            OfflineMode::Shutdown => 2,
        }
    }
}

impl TryFrom<i16> for OfflineMode {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(OfflineMode::None),
            1 => Ok(OfflineMode::SoftOffline),
            2 => Ok(OfflineMode::Shutdown),
            other => Err(InvalidCode::new("offline_request", other)),
        }
    }
}

/// A registered fleet member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    /// Unique fleet-wide name; one live instance per name
    pub name: String,
    pub kind: WorkerKind,
    pub supports_vr: bool,
    pub status: WorkerStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Internal id of the task this worker is busy with
    pub current_task_id: Option<i64>,
    pub offline_request: OfflineMode,
}

impl Worker {
    /// Whether the last heartbeat is older than `timeout`.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        match self.last_heartbeat {
            Some(beat) => now - beat > timeout,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_round_trip() {
        for code in 0..=3 {
            let kind = WorkerKind::try_from(code).unwrap();
            assert_eq!(i16::from(kind), code);
        }
        assert!(WorkerKind::try_from(4).is_err());
    }

    #[test]
    fn test_vr_only_honored_on_cpu() {
        assert!(WorkerKind::Cpu.effective_vr(true));
        assert!(!WorkerKind::Nvenc.effective_vr(true));
        assert!(!WorkerKind::Qsv.effective_vr(true));
        assert!(!WorkerKind::Vpu.effective_vr(true));
        assert!(!WorkerKind::Cpu.effective_vr(false));
    }

    #[test]
    fn test_retry_capability() {
        assert!(WorkerKind::Cpu.retries_failures());
        assert!(WorkerKind::Qsv.retries_failures());
        assert!(!WorkerKind::Nvenc.retries_failures());
        assert!(!WorkerKind::Vpu.retries_failures());
    }

    #[test]
    fn test_offline_mode_actions() {
        assert_eq!(OfflineMode::SoftOffline.action(), Some("offline"));
        assert_eq!(OfflineMode::Shutdown.action(), Some("shutdown"));
        assert_eq!(OfflineMode::None.action(), None);
        assert_eq!(
            OfflineMode::from_action("offline"),
            Some(OfflineMode::SoftOffline)
        );
        assert_eq!(OfflineMode::from_action("bogus"), None);
    }

    #[test]
    fn test_heartbeat_expiry() {
        let worker = Worker {
            id: 1,
            name: "w1".into(),
            kind: WorkerKind::Cpu,
            supports_vr: false,
            status: WorkerStatus::Idle,
            last_heartbeat: Some(Utc::now() - chrono::Duration::seconds(45)),
            current_task_id: None,
            offline_request: OfflineMode::None,
        };
        assert!(worker.heartbeat_expired(Utc::now(), chrono::Duration::seconds(30)));
        assert!(!worker.heartbeat_expired(Utc::now(), chrono::Duration::seconds(60)));
    }
}
