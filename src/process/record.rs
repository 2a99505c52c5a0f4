//! # Persisted runtime state of one managed process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::MetricsSnapshot;
use crate::process::{ProcessConfig, ProcessState};

/// How the most recent operator-initiated stop concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopKind {
    /// The process exited within the timeout after the termination signal.
    ManualGraceful,
    /// The process ignored the signal and was force-killed on timeout.
    ManualForced,
}

impl StopKind {
    /// Stable label, also the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopKind::ManualGraceful => "manual-graceful",
            StopKind::ManualForced => "manual-forced",
        }
    }

    /// Parses a persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual-graceful" => Some(StopKind::ManualGraceful),
            "manual-forced" => Some(StopKind::ManualForced),
            _ => None,
        }
    }
}

/// One registry row: definition snapshot plus mutable runtime state.
///
/// All state mutations flow through the controller's transition paths; the
/// monitor and the heartbeat channel write only the auxiliary fields
/// (`metrics`, `last_heartbeat`).
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// Opaque identifier, generated at registration, stable for the
    /// record's lifetime.
    pub id: String,
    /// Definition snapshot taken at registration.
    pub config: ProcessConfig,
    /// Current lifecycle state.
    pub state: ProcessState,
    /// OS process id; present only while a child may be alive.
    pub pid: Option<u32>,
    /// When the current (or last) instance entered `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the record last settled in a terminal state.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Automatically-triggered restarts so far; frozen once the record
    /// fails terminally.
    pub restart_count: u32,
    /// Last liveness ping received on the heartbeat channel.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Most recent failure reason, if any.
    pub error_message: Option<String>,
    /// Latest monitor metrics snapshot, if any.
    pub metrics: Option<MetricsSnapshot>,
    /// Set while the most recent stop was operator-initiated; cleared on
    /// the next start.
    pub stop_kind: Option<StopKind>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; bumped by every update.
    pub updated_at: DateTime<Utc>,
}

impl ProcessRecord {
    /// Wall-clock uptime of the current instance, when it is running.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        if self.state != ProcessState::Running {
            return None;
        }
        let started = self.started_at?;
        Utc::now().signed_duration_since(started).to_std().ok()
    }

    /// True once automatic recovery has been exhausted; only an explicit
    /// reset (or re-registration) re-arms it.
    pub fn is_retry_exhausted(&self) -> bool {
        self.state == ProcessState::Failed && self.restart_count >= self.config.max_retries
    }
}
