//! # Manager: wires the registry, controller, monitor, and heartbeat
//! channel into one runtime.
//!
//! The [`Manager`] is the composition root an embedding binary (or the
//! external command layer) talks to. It is built once at startup and hands
//! explicit references to every component; nothing reaches the registry
//! through ambient global state.
//!
//! ```text
//!   operator commands                    background services
//!   ─────────────────                    ───────────────────
//!   register/unregister ─► Registry ◄─── Monitor (poll loop)
//!   start/stop/restart  ─► Controller ◄── Monitor (handle_exit)
//!   status/list/logs    ─► Registry      Heartbeat server (UDS)
//!                                        Event logger (Bus → tracing)
//! ```
//!
//! `run()` blocks until an OS termination signal, then cancels the runtime
//! token and stops every managed process within the configured grace.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config::ManagerConfig;
use crate::core::controller::{Controller, LogTail, StopOutcome};
use crate::core::monitor::Monitor;
use crate::core::registry::{ListFilter, Registry};
use crate::core::shutdown;
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};
use crate::heartbeat::HeartbeatServer;
use crate::process::{load_documents, ProcessConfig, ProcessRecord};

/// Composition root of the orchestration runtime.
pub struct Manager {
    cfg: Arc<ManagerConfig>,
    bus: Bus,
    registry: Arc<Registry>,
    controller: Arc<Controller>,
    monitor: Arc<Monitor>,
    runtime_token: CancellationToken,
}

impl Manager {
    /// Opens the registry under `cfg.data_dir` and builds every component.
    ///
    /// Background services (monitor, heartbeat server, event logger) are
    /// not running yet; call [`Manager::start_services`] or [`Manager::run`].
    pub async fn new(cfg: ManagerConfig) -> Result<Self, Error> {
        cfg.ensure_dirs()?;
        let cfg = Arc::new(cfg);
        let bus = Bus::new(cfg.bus_capacity);
        let runtime_token = CancellationToken::new();

        let registry = Arc::new(Registry::open(&cfg.db_path()).await?);
        let controller = Controller::new(
            Arc::clone(&registry),
            Arc::clone(&cfg),
            bus.clone(),
            runtime_token.child_token(),
        );
        let monitor = Monitor::new(
            Arc::clone(&registry),
            Arc::clone(&controller),
            Arc::clone(&cfg),
            bus.clone(),
        )?;

        Ok(Self {
            cfg,
            bus,
            registry,
            controller,
            monitor,
            runtime_token,
        })
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The lifecycle controller.
    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// The event bus; subscribe for lifecycle events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Spawns the background services: monitor loop, heartbeat server, and
    /// the event logger that renders bus events through `tracing`.
    pub async fn start_services(&self) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut handles = Vec::new();
        handles.push(self.spawn_event_logger());
        handles.push(
            Arc::clone(&self.monitor).spawn(self.runtime_token.child_token()),
        );

        let heartbeat = HeartbeatServer::new(
            Arc::clone(&self.registry),
            self.cfg.heartbeat_socket(),
            self.bus.clone(),
        );
        handles.push(heartbeat.spawn(self.runtime_token.child_token()).await?);
        Ok(handles)
    }

    /// Runs until an OS termination signal, then shuts down.
    pub async fn run(&self) -> Result<(), Error> {
        self.start_services().await?;
        shutdown::wait_for_shutdown_signal().await?;
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        self.shutdown().await
    }

    /// Cancels background services and stops every managed process within
    /// the configured grace period.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.runtime_token.cancel();
        match self.controller.stop_all(self.cfg.grace).await {
            Ok(()) => {
                self.bus.publish(Event::now(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(e) => {
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                Err(e)
            }
        }
    }

    // ---------------------------
    // 1:1 command surface
    // ---------------------------

    /// Registers one process definition; returns the new record id.
    pub async fn register(&self, config: ProcessConfig) -> Result<String, Error> {
        let name = config.name.clone();
        let id = self.registry.register(config).await?;
        self.bus
            .publish(Event::now(EventKind::ProcessRegistered).with_process(name.as_str()));
        Ok(id)
    }

    /// Registers every document in a JSON array file; returns the ids in
    /// file order. The first failure aborts the batch.
    pub async fn register_batch(&self, path: &Path) -> Result<Vec<String>, Error> {
        let mut ids = Vec::new();
        for config in load_documents(path)? {
            ids.push(self.register(config).await?);
        }
        Ok(ids)
    }

    /// Deletes a record; `force` stops a running process first.
    pub async fn unregister(&self, key: &str, force: bool) -> Result<(), Error> {
        let record = self.registry.find(key).await?;
        self.controller.unregister(&record.id, force).await
    }

    /// Starts a process (and its dependencies).
    pub async fn start(&self, key: &str) -> Result<(), Error> {
        let record = self.registry.find(key).await?;
        self.controller.start(&record.id).await
    }

    /// Gracefully stops a process within the configured stop timeout.
    pub async fn stop(&self, key: &str) -> Result<StopOutcome, Error> {
        self.stop_with(key, true, self.cfg.stop_timeout).await
    }

    /// Stops a process with explicit gracefulness and timeout.
    pub async fn stop_with(
        &self,
        key: &str,
        graceful: bool,
        timeout: Duration,
    ) -> Result<StopOutcome, Error> {
        let record = self.registry.find(key).await?;
        self.controller.stop(&record.id, graceful, timeout).await
    }

    /// Stops (if needed) and starts a process again.
    pub async fn restart(&self, key: &str) -> Result<(), Error> {
        let record = self.registry.find(key).await?;
        self.controller.restart(&record.id).await
    }

    /// Re-arms a terminally failed record.
    pub async fn reset(&self, key: &str) -> Result<(), Error> {
        let record = self.registry.find(key).await?;
        self.controller.reset(&record.id).await
    }

    /// Fetches one record by id or name.
    pub async fn status(&self, key: &str) -> Result<ProcessRecord, Error> {
        self.registry.find(key).await
    }

    /// Lists records, optionally filtered.
    pub async fn list(&self, filter: ListFilter) -> Result<Vec<ProcessRecord>, Error> {
        self.registry.list(filter).await
    }

    /// Returns the tail of a process's captured stdout/stderr.
    pub async fn logs(&self, key: &str, lines: usize) -> Result<LogTail, Error> {
        let record = self.registry.find(key).await?;
        self.controller.logs(&record.id, lines).await
    }

    /// Renders every bus event through `tracing`.
    fn spawn_event_logger(&self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let token = self.runtime_token.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => log_event(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(target: "procvisor::events", skipped, "event logger lagged");
                        }
                    }
                }
            }
        })
    }
}

fn log_event(event: &Event) {
    let process = event.process.as_deref().unwrap_or("-");
    let reason = event.reason.as_deref().unwrap_or("");
    match event.kind {
        EventKind::ProcessFailed => {
            tracing::error!(target: "procvisor::events", seq = event.seq, process, attempt = ?event.attempt, reason, "process failed");
        }
        EventKind::HealthCheckFailed | EventKind::HeartbeatStale => {
            tracing::warn!(target: "procvisor::events", seq = event.seq, process, reason, "unhealthy");
        }
        EventKind::RestartScheduled => {
            tracing::warn!(target: "procvisor::events", seq = event.seq, process, attempt = ?event.attempt, delay_ms = ?event.delay_ms, reason, "restart scheduled");
        }
        EventKind::GraceExceeded => {
            tracing::error!(target: "procvisor::events", seq = event.seq, "shutdown grace exceeded");
        }
        EventKind::ProcessExited => {
            tracing::info!(target: "procvisor::events", seq = event.seq, process, exit_code = ?event.exit_code, "process exited");
        }
        EventKind::ProcessStarted => {
            tracing::info!(target: "procvisor::events", seq = event.seq, process, pid = ?event.pid, "process started");
        }
        _ => {
            tracing::info!(target: "procvisor::events", seq = event.seq, process, kind = ?event.kind, "event");
        }
    }
}
