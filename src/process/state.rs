//! # Lifecycle states of a managed process.
//!
//! ```text
//! registered --start--> starting --spawned--> running --stop--> stopping --exited--> stopped
//! starting --spawn failure--> failed
//! running  --unexpected exit, retries remain--> starting (automatic restart)
//! running  --retries exhausted / unrecoverable--> failed
//! stopping --timeout--> stopped (forced)
//! ```
//!
//! `stopped` and `failed` are terminal until a new `start` re-enters the
//! machine through `starting`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a process record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    /// Registered but never started (or explicitly reset).
    Registered,
    /// A spawn attempt is in flight, or an automatic restart is pending.
    Starting,
    /// The OS process is alive and monitored.
    Running,
    /// An operator stop is in flight.
    Stopping,
    /// Settled after a stop or a clean exit.
    Stopped,
    /// Settled after a spawn failure, crash, or exhausted retries.
    Failed,
}

impl ProcessState {
    /// Stable lowercase label, also the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Registered => "registered",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        }
    }

    /// Parses a persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(ProcessState::Registered),
            "starting" => Some(ProcessState::Starting),
            "running" => Some(ProcessState::Running),
            "stopping" => Some(ProcessState::Stopping),
            "stopped" => Some(ProcessState::Stopped),
            "failed" => Some(ProcessState::Failed),
            _ => None,
        }
    }

    /// True while a child process may exist (starting/running/stopping).
    pub fn is_running_family(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    /// True for states that only a new `start` can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for state in [
            ProcessState::Registered,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Stopping,
            ProcessState::Stopped,
            ProcessState::Failed,
        ] {
            assert_eq!(ProcessState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ProcessState::parse("crashed"), None);
    }

    #[test]
    fn family_classification() {
        assert!(ProcessState::Starting.is_running_family());
        assert!(ProcessState::Running.is_running_family());
        assert!(ProcessState::Stopping.is_running_family());
        assert!(!ProcessState::Registered.is_running_family());
        assert!(ProcessState::Stopped.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
    }
}
