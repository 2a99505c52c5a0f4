//! Core orchestration engine: registry, controller, monitor, manager.

mod config;
mod controller;
mod manager;
mod monitor;
mod probe;
mod registry;
mod runner;
pub(crate) mod shutdown;

pub use config::ManagerConfig;
pub use controller::{Controller, LogTail, StopOutcome};
pub use manager::Manager;
pub use monitor::Monitor;
pub use probe::{HealthFailure, MetricsSnapshot, Prober};
pub use registry::{ListFilter, RecordPatch, Registry};
pub use runner::{DockerRunner, Runner, RunnerChild, SpawnRequest, SubprocessRunner};
