//! # Restart policies for managed processes.
//!
//! [`RestartPolicy`] determines whether a process is restarted after it
//! exits or fails a health check.
//!
//! - [`RestartPolicy::Never`] — no automatic recovery.
//! - [`RestartPolicy::OnFailure`] — recover only from abnormal exits; a
//!   clean (zero) exit settles as stopped (default).
//! - [`RestartPolicy::Always`] — recover from any exit, clean or not.
//! - [`RestartPolicy::UnlessStopped`] — recover from any exit unless the
//!   most recent stop was an explicit operator stop.
//!
//! An operator-initiated stop never triggers automatic recovery under any
//! policy; `unless-stopped` only widens the exit conditions it recovers
//! from. All policies are bounded by the record's `max_retries`.

use serde::{Deserialize, Serialize};

/// How a managed process left its running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit status zero.
    Clean,
    /// Non-zero exit status.
    Abnormal(i32),
    /// Status unobtainable (killed by signal, pid vanished, health failure).
    Unknown,
}

impl ExitKind {
    /// Builds an exit kind from an optional exit code.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitKind::Clean,
            Some(code) => ExitKind::Abnormal(code),
            None => ExitKind::Unknown,
        }
    }

    /// Builds an exit kind from a reaped exit status.
    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        Self::from_code(status.code())
    }

    /// Returns the exit code when one was observed.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitKind::Clean => Some(0),
            ExitKind::Abnormal(code) => Some(*code),
            ExitKind::Unknown => None,
        }
    }

    /// True only for a zero exit status.
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitKind::Clean)
    }
}

/// Policy controlling automatic recovery after a process exits or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart automatically.
    Never,
    /// Restart only after an abnormal exit (default).
    #[default]
    OnFailure,
    /// Restart after any exit.
    Always,
    /// Restart after any exit, unless the last stop was operator-initiated.
    UnlessStopped,
}

impl RestartPolicy {
    /// Decides whether an automatic restart is warranted for the given exit.
    ///
    /// `manual_stop` reflects whether the most recent stop of this record was
    /// an explicit operator stop; it short-circuits every policy.
    pub fn should_restart(&self, exit: ExitKind, manual_stop: bool) -> bool {
        if manual_stop {
            return false;
        }
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => !exit.is_clean(),
            RestartPolicy::Always => true,
            RestartPolicy::UnlessStopped => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_does_not_restart() {
        assert!(!RestartPolicy::Never.should_restart(ExitKind::Abnormal(1), false));
        assert!(!RestartPolicy::Never.should_restart(ExitKind::Clean, false));
    }

    #[test]
    fn on_failure_accepts_clean_exit() {
        assert!(!RestartPolicy::OnFailure.should_restart(ExitKind::Clean, false));
        assert!(RestartPolicy::OnFailure.should_restart(ExitKind::Abnormal(1), false));
        assert!(RestartPolicy::OnFailure.should_restart(ExitKind::Unknown, false));
    }

    #[test]
    fn always_restarts_any_exit() {
        assert!(RestartPolicy::Always.should_restart(ExitKind::Clean, false));
        assert!(RestartPolicy::Always.should_restart(ExitKind::Abnormal(7), false));
    }

    #[test]
    fn manual_stop_overrides_every_policy() {
        for policy in [
            RestartPolicy::Never,
            RestartPolicy::OnFailure,
            RestartPolicy::Always,
            RestartPolicy::UnlessStopped,
        ] {
            assert!(!policy.should_restart(ExitKind::Abnormal(1), true));
        }
    }

    #[test]
    fn serde_uses_kebab_case() {
        let policy: RestartPolicy = serde_json::from_str("\"unless-stopped\"").unwrap();
        assert_eq!(policy, RestartPolicy::UnlessStopped);
        assert_eq!(
            serde_json::to_string(&RestartPolicy::OnFailure).unwrap(),
            "\"on-failure\""
        );
    }
}
