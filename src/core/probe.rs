//! # Liveness, metrics, and health probing.
//!
//! [`Prober`] wraps the two external signal sources the monitor consumes:
//! the OS process table (via `sysinfo`) and HTTP health-check endpoints
//! (via `reqwest`). Health failures are verdicts, not errors — the monitor
//! converts them into state transitions and never raises them to a caller.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::error::Error;

/// Point-in-time resource usage of one managed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// CPU usage in percent of one core.
    pub cpu_percent: f32,
    /// Resident set size in mebibytes.
    pub memory_mb: f64,
    /// Resident set as a share of total system memory.
    pub memory_percent: f32,
    /// Virtual memory size in mebibytes.
    pub virtual_memory_mb: f64,
    /// Thread count (0 where the platform does not expose it).
    pub threads: u32,
    /// Open file descriptors (0 where the platform does not expose it).
    pub open_fds: u32,
    /// Seconds since the instance entered `running`.
    pub uptime_seconds: u64,
    /// When this snapshot was taken.
    pub sampled_at: DateTime<Utc>,
}

/// Why a health check came back unhealthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthFailure {
    /// No response within the configured timeout.
    Timeout,
    /// Responded, but with a status other than 200.
    Status(u16),
    /// Connection-level failure (refused, reset, DNS, ...).
    Transport(String),
}

impl fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthFailure::Timeout => write!(f, "timed out"),
            HealthFailure::Status(code) => write!(f, "status {code}"),
            HealthFailure::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

/// Shared probe state: one refreshed process table plus one HTTP client.
///
/// The process table sits behind a plain mutex held only for in-memory
/// reads; HTTP probes run outside of it, so probing one process never
/// blocks probing another.
pub struct Prober {
    system: Mutex<System>,
    http: reqwest::Client,
}

impl Prober {
    /// Builds a prober whose health checks time out after `health_timeout`.
    pub fn new(health_timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(health_timeout)
            .build()?;
        Ok(Self {
            system: Mutex::new(System::new()),
            http,
        })
    }

    /// Refreshes the process table and memory totals; call once per
    /// monitor pass.
    pub fn refresh(&self) {
        let mut sys = self.lock_system();
        sys.refresh_memory();
        sys.refresh_processes(ProcessesToUpdate::All, true);
    }

    /// True while the pid exists in the process table and is not a zombie.
    pub fn pid_alive(&self, pid: u32) -> bool {
        let sys = self.lock_system();
        match sys.process(Pid::from_u32(pid)) {
            Some(process) => process.status() != ProcessStatus::Zombie,
            None => false,
        }
    }

    /// Samples resource usage for the pid from the refreshed table.
    pub fn sample(&self, pid: u32, started_at: Option<DateTime<Utc>>) -> Option<MetricsSnapshot> {
        let sys = self.lock_system();
        let process = sys.process(Pid::from_u32(pid))?;
        let total_memory = sys.total_memory();
        let memory = process.memory();

        let uptime_seconds = started_at
            .and_then(|t| Utc::now().signed_duration_since(t).to_std().ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Some(MetricsSnapshot {
            cpu_percent: process.cpu_usage(),
            memory_mb: memory as f64 / (1024.0 * 1024.0),
            memory_percent: if total_memory > 0 {
                (memory as f32 / total_memory as f32) * 100.0
            } else {
                0.0
            },
            virtual_memory_mb: process.virtual_memory() as f64 / (1024.0 * 1024.0),
            threads: thread_count(process),
            open_fds: open_fd_count(pid),
            uptime_seconds,
            sampled_at: Utc::now(),
        })
    }

    /// Issues one HTTP GET against `http://localhost:<port><path>`.
    ///
    /// Success is exclusively HTTP 200; anything else — non-200 status,
    /// timeout, transport failure — is an unhealthy verdict.
    pub async fn health_check(&self, port: u16, path: &str) -> Result<(), HealthFailure> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let url = format!("http://localhost:{port}{path}");
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => Ok(()),
            Ok(resp) => Err(HealthFailure::Status(resp.status().as_u16())),
            Err(e) if e.is_timeout() => Err(HealthFailure::Timeout),
            Err(e) => Err(HealthFailure::Transport(e.to_string())),
        }
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-shot liveness check with its own throwaway process table; used on
/// paths that do not hold a [`Prober`] (detached stops).
pub(crate) fn pid_alive_oneshot(pid: u32) -> bool {
    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    match sys.process(target) {
        Some(process) => process.status() != ProcessStatus::Zombie,
        None => false,
    }
}

#[cfg(target_os = "linux")]
fn thread_count(process: &sysinfo::Process) -> u32 {
    process.tasks().map(|t| t.len() as u32).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn thread_count(_process: &sysinfo::Process) -> u32 {
    0
}

#[cfg(target_os = "linux")]
fn open_fd_count(pid: u32) -> u32 {
    std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| entries.count() as u32)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn open_fd_count(_pid: u32) -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        let prober = Prober::new(Duration::from_secs(1)).unwrap();
        prober.refresh();
        assert!(prober.pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        let prober = Prober::new(Duration::from_secs(1)).unwrap();
        prober.refresh();
        assert!(!prober.pid_alive(u32::MAX - 7));
    }

    #[test]
    fn sampling_own_pid_yields_metrics() {
        let prober = Prober::new(Duration::from_secs(1)).unwrap();
        prober.refresh();
        let snapshot = prober
            .sample(std::process::id(), Some(Utc::now()))
            .expect("own process is sampleable");
        assert!(snapshot.memory_mb > 0.0);
    }

    #[tokio::test]
    async fn health_check_against_closed_port_is_transport_failure() {
        let prober = Prober::new(Duration::from_millis(500)).unwrap();
        // Port 1 is essentially never listening on a test host.
        match prober.health_check(1, "/healthz").await {
            Err(HealthFailure::Transport(_)) | Err(HealthFailure::Timeout) => {}
            other => panic!("expected transport failure, got {other:?}"),
        }
    }

    #[test]
    fn failure_renders_human_readable() {
        assert_eq!(HealthFailure::Status(503).to_string(), "status 503");
        assert_eq!(HealthFailure::Timeout.to_string(), "timed out");
    }
}
