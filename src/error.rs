//! Error types used by the procvisor runtime.
//!
//! Two propagation tiers exist:
//!
//! - Structural errors (duplicate name, invalid transition, not found) are
//!   raised synchronously to the caller of the mutating operation.
//! - Runtime failures observed by the monitor (crash, failed health check,
//!   stale heartbeat) are never raised; they become a state transition plus
//!   an `error_message` on the record, visible via `status`/`get`.
//!
//! [`Error::as_label`] provides short stable snake_case labels for
//! logging/metrics.

use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessState;

/// Errors raised by registry and controller operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A live record with the same name already exists.
    #[error("process '{name}' is already registered")]
    DuplicateName {
        /// The conflicting process name.
        name: String,
    },

    /// No record matches the given id or name.
    #[error("process '{key}' not found")]
    NotFound {
        /// The id or name that was looked up.
        key: String,
    },

    /// The requested operation is not legal in the record's current state.
    #[error("cannot {op} process '{name}' while it is {state}")]
    InvalidState {
        /// The attempted operation (`start`, `stop`, ...).
        op: &'static str,
        /// Process name.
        name: String,
        /// State the record was in when the operation was rejected.
        state: ProcessState,
    },

    /// The runner could not create the OS process.
    #[error("failed to spawn '{name}': {reason}")]
    SpawnFailure {
        /// Process name.
        name: String,
        /// Verbatim reason, also recorded in `error_message`.
        reason: String,
    },

    /// A declared dependency name is not registered.
    #[error("dependency '{missing}' of '{dependent}' is not registered")]
    DependencyNotFound {
        /// The process whose dependency list referenced the missing name.
        dependent: String,
        /// The missing dependency name.
        missing: String,
    },

    /// The dependency graph loops back onto a process already being started.
    #[error("dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle {
        /// Names along the offending start chain, repeat included.
        chain: Vec<String>,
    },

    /// Automatic recovery gave up after `max_retries` attempts.
    #[error("process '{name}' exceeded its restart limit of {max_retries}")]
    RestartLimitExceeded {
        /// Process name.
        name: String,
        /// The configured retry ceiling.
        max_retries: u32,
    },

    /// Shutdown grace period expired; the listed processes were force-killed.
    #[error("shutdown grace {grace:?} exceeded; force-killed: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of processes that ignored the termination signal.
        stuck: Vec<String>,
    },

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    /// Filesystem or socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Document or column (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// HTTP client construction failure.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::DuplicateName { .. } => "duplicate_name",
            Error::NotFound { .. } => "not_found",
            Error::InvalidState { .. } => "invalid_state",
            Error::SpawnFailure { .. } => "spawn_failure",
            Error::DependencyNotFound { .. } => "dependency_not_found",
            Error::DependencyCycle { .. } => "dependency_cycle",
            Error::RestartLimitExceeded { .. } => "restart_limit_exceeded",
            Error::GraceExceeded { .. } => "grace_exceeded",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Serde(_) => "serde",
            Error::Http(_) => "http",
        }
    }
}
