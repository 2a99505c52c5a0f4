//! # Global runtime configuration.
//!
//! [`ManagerConfig`] centralizes the tunables shared by the registry,
//! controller, monitor, and heartbeat channel. Everything lives under
//! `data_dir`: the SQLite database, per-process log files, and the
//! heartbeat socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for the orchestration runtime.
///
/// ## Field semantics
/// - `poll_interval`: one monitor pass per interval per process
/// - `health_timeout`: HTTP health-check deadline (only 200 is healthy)
/// - `stop_timeout`: graceful-stop window before escalating to a force kill
/// - `allowed_drift`: heartbeat silence tolerated before a record counts
///   as unhealthy
/// - `min_uptime`: survival time after which the backoff streak resets
/// - `grace`: shutdown window for stopping every managed process
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Root directory for the database, log files, and heartbeat socket.
    pub data_dir: PathBuf,

    /// Interval between monitor passes.
    pub poll_interval: Duration,

    /// Deadline for one HTTP health-check request.
    pub health_timeout: Duration,

    /// How long `stop` waits for a cooperative exit before force-killing.
    pub stop_timeout: Duration,

    /// Maximum tolerated `now - last_heartbeat` for heartbeating processes.
    pub allowed_drift: Duration,

    /// Interval exported to heartbeat clients in spawned environments.
    pub heartbeat_interval: Duration,

    /// Uptime after which a restarted process counts as recovered and the
    /// backoff streak resets to the base delay.
    pub min_uptime: Duration,

    /// Delay schedule between automatic restart attempts.
    pub backoff: BackoffPolicy,

    /// Pause inserted between the stop and start halves of a manual restart.
    pub restart_pause: Duration,

    /// Maximum time to wait for managed processes during shutdown.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1; clamped by the bus).
    pub bus_capacity: usize,
}

impl Default for ManagerConfig {
    /// Defaults mirror common single-host supervision settings:
    /// 10s polling, 5s health timeout, 10s stop timeout, 30s heartbeat
    /// drift, 1s-to-60s doubling backoff, 30s shutdown grace.
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("procvisor-data"),
            poll_interval: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            allowed_drift: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            min_uptime: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            restart_pause: Duration::from_secs(1),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

impl ManagerConfig {
    /// Returns defaults rooted at the given data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("procvisor.db")
    }

    /// Directory holding per-process stdout/stderr log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Path of the heartbeat Unix domain socket.
    pub fn heartbeat_socket(&self) -> PathBuf {
        self.data_dir.join("heartbeat.sock")
    }

    /// Stdout log file for the named process.
    pub fn stdout_log(&self, name: &str) -> PathBuf {
        self.log_dir().join(format!("{name}.stdout.log"))
    }

    /// Stderr log file for the named process.
    pub fn stderr_log(&self, name: &str) -> PathBuf {
        self.log_dir().join(format!("{name}.stderr.log"))
    }

    /// Creates `data_dir` and the log directory if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.log_dir())
    }
}

impl AsRef<Path> for ManagerConfig {
    fn as_ref(&self) -> &Path {
        &self.data_dir
    }
}
