//! # Lifecycle events emitted by the orchestration runtime.
//!
//! [`EventKind`] classifies events across three categories:
//! - **Registration events**: records entering/leaving the registry.
//! - **Lifecycle events**: spawn/stop/exit flow of managed processes.
//! - **Health and shutdown events**: monitor verdicts and manager shutdown.
//!
//! Each event carries a globally unique sequence number (`seq`) that
//! increases monotonically; use it to restore exact ordering when events are
//! observed out of order.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A new record was created in the registry.
    ProcessRegistered,
    /// A record was deleted from the registry.
    ProcessDeregistered,
    /// A spawn attempt is beginning (record moved to `starting`).
    ProcessStarting,
    /// The OS process was created; record is `running`. Sets `pid`.
    ProcessStarted,
    /// An operator stop is in flight (record moved to `stopping`).
    ProcessStopping,
    /// The record settled in `stopped`.
    ProcessStopped,
    /// A managed process exited outside of an operator stop. Sets `exit_code`
    /// when the status was observable.
    ProcessExited,
    /// The record settled in `failed`. Sets `reason`.
    ProcessFailed,
    /// An automatic restart was scheduled. Sets `attempt` (the restart
    /// counter after the increment) and `delay_ms`.
    RestartScheduled,
    /// An HTTP health check came back unhealthy. Sets `reason`.
    HealthCheckFailed,
    /// The heartbeat channel went silent past the allowed drift. Sets `reason`.
    HeartbeatStale,
    /// A liveness ping arrived on the heartbeat channel.
    HeartbeatReceived,
    /// An OS termination signal was observed.
    ShutdownRequested,
    /// Every managed process stopped within the shutdown grace period.
    AllStoppedWithin,
    /// The shutdown grace period expired; survivors were force-killed.
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
    /// Event classification.
    pub kind: EventKind,
    /// Process name, if applicable.
    pub process: Option<Arc<str>>,
    /// OS process id, if applicable.
    pub pid: Option<u32>,
    /// Observed exit code, when the exit status was obtainable.
    pub exit_code: Option<i32>,
    /// Restart counter value for restart events.
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt, in milliseconds.
    pub delay_ms: Option<u64>,
    /// Human-readable reason (errors, health verdicts, staleness).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current timestamp and the
    /// next global sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            kind,
            process: None,
            pid: None,
            exit_code: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a process name.
    #[inline]
    pub fn with_process(mut self, name: impl Into<Arc<str>>) -> Self {
        self.process = Some(name.into());
        self
    }

    /// Attaches an OS process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an observed exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Attaches a restart counter value.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
