//! # Background health monitor.
//!
//! One shared scheduler performs a pass per [`ManagerConfig::poll_interval`]:
//! list the `running` records, refresh the OS process table once, then fan
//! the per-record probes out concurrently so a slow health endpoint on one
//! process never delays the checks of another.
//!
//! Per record and pass:
//! 1. Reap the owned child (real exit code) or consult the process table;
//!    a vanished pid is an unexpected exit with unknown status.
//! 2. Sample and store the metrics snapshot.
//! 3. Issue the HTTP health check when one is configured (HTTP 200 within
//!    the timeout is the only healthy answer).
//! 4. Compare heartbeat age against the allowed drift.
//!
//! The monitor never mutates lifecycle state itself: exits and unhealthy
//! verdicts are handed to the controller, which applies the restart policy;
//! only the auxiliary metrics field is written directly.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::config::ManagerConfig;
use crate::core::controller::Controller;
use crate::core::probe::Prober;
use crate::core::registry::{ListFilter, Registry};
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};
use crate::process::{ProcessRecord, ProcessState};

/// Continuous polling loop over all running records.
pub struct Monitor {
    registry: Arc<Registry>,
    controller: Arc<Controller>,
    prober: Prober,
    cfg: Arc<ManagerConfig>,
    bus: Bus,
}

impl Monitor {
    /// Creates a monitor sharing the registry and controller.
    pub fn new(
        registry: Arc<Registry>,
        controller: Arc<Controller>,
        cfg: Arc<ManagerConfig>,
        bus: Bus,
    ) -> Result<Arc<Self>, Error> {
        let prober = Prober::new(cfg.health_timeout)?;
        Ok(Arc::new(Self {
            registry,
            controller,
            prober,
            cfg,
            bus,
        }))
    }

    /// Spawns the polling loop; it stops at the next interval boundary
    /// after the token is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.cfg.poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => self.pass().await,
                }
            }
        })
    }

    /// One monitoring pass over every running record.
    pub async fn pass(&self) {
        let running = match self
            .registry
            .list(ListFilter::by_state(ProcessState::Running))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(target: "procvisor::monitor", error = %e, "listing running records failed");
                return;
            }
        };
        if running.is_empty() {
            return;
        }

        self.prober.refresh();
        let probes = running.into_iter().map(|record| self.check_record(record));
        futures::future::join_all(probes).await;
    }

    async fn check_record(&self, record: ProcessRecord) {
        let id = record.id.clone();
        let name = record.config.name.clone();

        // Owned children yield a real exit status.
        if let Some(exit) = self.controller.poll_exit(&id).await {
            self.report_exit(&id, &name, exit.code()).await;
            return;
        }

        let Some(pid) = record.pid else {
            // Running without a pid should not happen; treat as gone.
            self.report_exit(&id, &name, None).await;
            return;
        };
        if !self.prober.pid_alive(pid) {
            self.report_exit(&id, &name, None).await;
            return;
        }

        if let Some(snapshot) = self.prober.sample(pid, record.started_at) {
            if let Err(e) = self.registry.store_metrics(&id, &snapshot).await {
                tracing::warn!(target: "procvisor::monitor", process = %name, error = %e, "storing metrics failed");
            }
        }

        if let Some(path) = record.config.health_check.as_deref() {
            if let Some(port) = record.config.ports.first() {
                if let Err(failure) = self.prober.health_check(*port, path).await {
                    let reason = format!("health check failed: {failure}");
                    self.bus.publish(
                        Event::now(EventKind::HealthCheckFailed)
                            .with_process(name.as_str())
                            .with_reason(reason.as_str()),
                    );
                    self.report_unhealthy(&id, &name, &reason).await;
                    return;
                }
            }
        }

        if let Some(last_heartbeat) = record.last_heartbeat {
            let age = chrono::Utc::now().signed_duration_since(last_heartbeat);
            let stale = age
                .to_std()
                .map(|age| age > self.cfg.allowed_drift)
                .unwrap_or(false);
            if stale {
                let reason = format!("heartbeat stale for {}s", age.num_seconds());
                self.bus.publish(
                    Event::now(EventKind::HeartbeatStale)
                        .with_process(name.as_str())
                        .with_reason(reason.as_str()),
                );
                self.report_unhealthy(&id, &name, &reason).await;
            }
        }
    }

    async fn report_exit(&self, id: &str, name: &str, exit_code: Option<i32>) {
        if let Err(e) = self.controller.handle_exit(id, exit_code, false).await {
            tracing::warn!(target: "procvisor::monitor", process = %name, error = %e, "handling exit failed");
        }
    }

    async fn report_unhealthy(&self, id: &str, name: &str, reason: &str) {
        if let Err(e) = self.controller.handle_unhealthy(id, reason).await {
            tracing::warn!(target: "procvisor::monitor", process = %name, error = %e, "handling unhealthy process failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{BackoffPolicy, RestartPolicy};
    use crate::process::ProcessConfig;
    use std::time::Duration;

    async fn harness() -> (Arc<Registry>, Arc<Controller>, Arc<Monitor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ManagerConfig::with_data_dir(dir.path());
        cfg.poll_interval = Duration::from_millis(25);
        cfg.stop_timeout = Duration::from_millis(300);
        cfg.allowed_drift = Duration::from_millis(80);
        cfg.backoff = BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            factor: 2.0,
        };
        cfg.min_uptime = Duration::from_secs(3600);
        let cfg = Arc::new(cfg);
        let bus = Bus::new(64);
        let registry = Arc::new(Registry::open_in_memory().await.unwrap());
        let controller = Controller::new(
            Arc::clone(&registry),
            Arc::clone(&cfg),
            bus.clone(),
            CancellationToken::new(),
        );
        let monitor = Monitor::new(
            Arc::clone(&registry),
            Arc::clone(&controller),
            cfg,
            bus,
        )
        .unwrap();
        (registry, controller, monitor, dir)
    }

    #[tokio::test]
    async fn pass_with_no_running_records_is_a_noop() {
        let (registry, _controller, monitor, _dir) = harness().await;
        registry
            .register(ProcessConfig::new("svc1", "sleep 100"))
            .await
            .unwrap();
        monitor.pass().await;
        assert_eq!(
            registry.get_by_name("svc1").await.unwrap().state,
            ProcessState::Registered
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pass_collects_metrics_for_a_live_process() {
        let (registry, controller, monitor, _dir) = harness().await;
        let id = registry
            .register(ProcessConfig::new("svc1", "sleep 100"))
            .await
            .unwrap();
        controller.start(&id).await.unwrap();

        monitor.pass().await;
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Running);
        assert!(record.metrics.is_some(), "pass stores a metrics snapshot");

        controller.stop(&id, false, Duration::ZERO).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn vanished_process_is_reported_as_exit() {
        let (registry, controller, monitor, _dir) = harness().await;
        let id = registry
            .register(
                ProcessConfig::new("oneshot", "exit 0")
                    .with_restart_policy(RestartPolicy::OnFailure),
            )
            .await
            .unwrap();
        controller.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        monitor.pass().await;
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Stopped);
        assert!(record.pid.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_heartbeat_flips_a_live_process_to_unhealthy() {
        let (registry, controller, monitor, _dir) = harness().await;
        let id = registry
            .register(
                ProcessConfig::new("quiet", "sleep 100")
                    .with_restart_policy(RestartPolicy::Never),
            )
            .await
            .unwrap();
        controller.start(&id).await.unwrap();
        registry.touch_heartbeat(&id).await.unwrap();

        // Fresh heartbeat: stays healthy.
        monitor.pass().await;
        assert_eq!(registry.get(&id).await.unwrap().state, ProcessState::Running);

        // Let the heartbeat go stale past the allowed drift.
        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.pass().await;
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Failed);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .contains("heartbeat stale"));
    }
}
