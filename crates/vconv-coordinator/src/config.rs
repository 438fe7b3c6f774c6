//! Coordinator configuration.
//!
//! Layered: built-in defaults, then an optional `config.{toml,ini}`
//! document, then `VCONV_*` environment overrides
//! (`VCONV_SERVER__PORT=9000` maps to `server.port`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathsConfig {
    /// Comma-separated absolute scan roots
    #[serde(default)]
    pub scan_paths: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Minutes between scans. Kept for compatibility with older
    /// deployments; the cron-style hourly schedule ignores it.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    /// Run a full scan when the coordinator starts
    #[serde(default = "default_true")]
    pub scan_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_stall_timeout")]
    pub task_stall_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost:5432/vconv".to_string())
}

fn default_max_connections() -> u32 {
    10
}

fn default_scan_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_stall_timeout() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
            scan_on_startup: default_true(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            task_stall_timeout_secs: default_stall_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from `file` (extension resolved by the config
    /// crate) plus `VCONV_*` environment overrides.
    pub fn load(file: &str) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("VCONV").separator("__"))
            .build()
            .context("failed to read configuration")?;
        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Parsed scan roots in declaration order.
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        self.paths
            .scan_paths
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Keep only roots that exist on disk, warning for each dropped one.
    /// Errors when no root is usable.
    pub fn usable_scan_roots(&self) -> anyhow::Result<Vec<PathBuf>> {
        let roots = self.scan_roots();
        if roots.is_empty() {
            anyhow::bail!("no scan roots configured (paths.scan_paths)");
        }
        let usable: Vec<PathBuf> = roots
            .into_iter()
            .filter(|root| {
                if root.is_dir() {
                    true
                } else {
                    warn!(root = %root.display(), "scan root does not exist, skipping");
                    false
                }
            })
            .collect();
        if usable.is_empty() {
            anyhow::bail!("all configured scan roots are missing");
        }
        Ok(usable)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness.heartbeat_timeout_secs as i64)
    }

    pub fn task_stall_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness.task_stall_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.sweep_interval_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.liveness.heartbeat_timeout_secs, 30);
        assert_eq!(config.liveness.task_stall_timeout_secs, 60);
        assert_eq!(config.liveness.sweep_interval_secs, 30);
        assert!(config.scheduler.scan_on_startup);
    }

    #[test]
    fn test_scan_roots_parsing() {
        let config = CoordinatorConfig {
            paths: PathsConfig {
                scan_paths: "/srv/media, /mnt/films ,,".to_string(),
            },
            ..Default::default()
        };
        assert_eq!(
            config.scan_roots(),
            vec![PathBuf::from("/srv/media"), PathBuf::from("/mnt/films")]
        );
    }

    #[test]
    fn test_empty_roots_rejected() {
        let config = CoordinatorConfig::default();
        assert!(config.usable_scan_roots().is_err());
    }

    #[test]
    fn test_all_missing_roots_rejected() {
        let config = CoordinatorConfig {
            paths: PathsConfig {
                scan_paths: "/definitely/not/here,/nor/here".to_string(),
            },
            ..Default::default()
        };
        assert!(config.usable_scan_roots().is_err());
    }

    #[test]
    fn test_some_missing_roots_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            paths: PathsConfig {
                scan_paths: format!("{},/definitely/not/here", dir.path().display()),
            },
            ..Default::default()
        };
        let usable = config.usable_scan_roots().unwrap();
        assert_eq!(usable, vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_timeout_accessors() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.heartbeat_timeout(), chrono::Duration::seconds(30));
        assert_eq!(config.task_stall_timeout(), chrono::Duration::seconds(60));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }
}
