//! # procvisor
//!
//! **procvisor** is a local process-lifecycle orchestrator: it registers
//! arbitrary child processes, starts and stops them with dependency
//! ordering, continuously monitors their health, and recovers them
//! according to a declared restart policy — without modifying the
//! supervised code.
//!
//! ## Architecture
//! ```text
//!              ┌────────────────────────────────────────────────┐
//!              │  Manager (composition root)                    │
//!              │  - Bus (broadcast lifecycle events)            │
//!              │  - 1:1 command surface for an external CLI     │
//!              └───────┬───────────────┬───────────────┬────────┘
//!                      ▼               ▼               ▼
//!              ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!              │  Controller  │ │   Monitor    │ │  Heartbeat   │
//!              │ spawn/stop/  │ │ poll metrics │ │   server     │
//!              │ restart,     │ │ health/drift │ │ (UDS pings)  │
//!              │ dependencies │ │              │ │              │
//!              └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!                     │   handle_exit / handle_unhealthy │
//!                     │◄───────────────┘                 │
//!                     ▼                                  ▼
//!              ┌────────────────────────────────────────────────┐
//!              │  Registry (SQLite, serialized mutations)       │
//!              └────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! ```text
//! registered ──start──► starting ──spawned──► running ──stop──► stopping ──► stopped
//!                 │                              │
//!                 └─ spawn failure ─► failed     ├─ unexpected exit, retries remain
//!                                                │      └─► starting (backoff actor)
//!                                                └─ retries exhausted ─► failed
//! ```
//!
//! ## Example
//! ```no_run
//! use procvisor::{Manager, ManagerConfig, ProcessConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Manager::new(ManagerConfig::with_data_dir("./data")).await?;
//!     let id = manager
//!         .register(ProcessConfig::new("svc1", "sleep 100"))
//!         .await?;
//!     manager.start(&id).await?;
//!
//!     // Blocks until SIGINT/SIGTERM, supervising in the background.
//!     manager.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Managed processes that cannot expose an HTTP health endpoint can report
//! liveness through the heartbeat channel instead; see
//! [`HeartbeatClient::from_env`].

mod core;
mod error;
mod events;
mod heartbeat;
mod policies;
mod process;

// ---- Public re-exports ----

pub use core::{
    Controller, DockerRunner, HealthFailure, ListFilter, LogTail, Manager, ManagerConfig,
    MetricsSnapshot, Monitor, Prober, RecordPatch, Registry, Runner, RunnerChild, SpawnRequest,
    StopOutcome, SubprocessRunner,
};
pub use error::Error;
pub use events::{Bus, Event, EventKind};
pub use heartbeat::{
    HeartbeatClient, HeartbeatMessage, HeartbeatServer, ENV_HEARTBEAT_INTERVAL_SECS,
    ENV_HEARTBEAT_SOCKET, ENV_PROCESS_ID,
};
pub use policies::{BackoffPolicy, ExitKind, RestartPolicy};
pub use process::{
    load_documents, ProcessConfig, ProcessRecord, ProcessState, ProcessType, ResourceLimits,
    StopKind,
};

// Optional: tracing-subscriber bootstrap for embedding binaries.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
mod logging;
#[cfg(feature = "logging")]
pub use logging::init_logging;
