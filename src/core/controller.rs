//! # Lifecycle controller.
//!
//! The [`Controller`] owns process spawning, signaling, and every state
//! transition. It is the only component that moves records through the
//! lifecycle machine; the monitor requests transitions through
//! [`Controller::handle_exit`] / [`Controller::handle_unhealthy`] and never
//! writes state itself.
//!
//! ## Transition ownership
//! Every claim on a record goes through the registry's compare-and-swap
//! transitions, so two racing operations on the same id resolve to exactly
//! one winner:
//! - `start` claims `{registered, stopped, failed} -> starting`; a caller
//!   that loses the race to a concurrent start observes the record coming
//!   up and returns without spawning a second process.
//! - `stop` claims `{starting, running} -> stopping` and always settles in
//!   `stopped`, recording whether the forced-kill path fired.
//! - automatic recovery holds the record in `starting` while the backoff
//!   actor sleeps; an operator stop during the sleep wins the CAS and the
//!   actor aborts when it wakes.
//!
//! ## Dependency starts
//! `start` resolves declared dependencies depth-first before spawning the
//! dependent, tracking the ids on the current chain and failing fast with
//! `DependencyCycle` on a repeat. Recursion issues nested sequential
//! registry calls; no lock is held across them.
//!
//! ## Automatic recovery
//! When a restart is warranted the controller dispatches a detached restart
//! actor: sleep the backoff delay (cancellable via the runtime token), then
//! re-spawn. Spawn failures inside the actor count toward `max_retries`;
//! exhaustion settles the record in `failed` with the retry-limit message,
//! and only an explicit [`Controller::reset`] (or re-registration) re-arms
//! automatic recovery after that.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config::ManagerConfig;
use crate::core::probe;
use crate::core::registry::{ListFilter, RecordPatch, Registry};
use crate::core::runner::{self, runner_for, RunnerChild, SpawnRequest};
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};
use crate::heartbeat;
use crate::policies::ExitKind;
use crate::process::{ProcessRecord, ProcessState, StopKind};

/// Environment variables never inherited by managed processes.
const ENV_DENY_LIST: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "DATABASE_URL",
    "GITHUB_TOKEN",
    "LD_PRELOAD",
    "NPM_TOKEN",
];

/// Poll cadence while waiting for a detached pid to exit.
const DETACHED_POLL: Duration = Duration::from_millis(100);

/// How an operator stop concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// True when the forced-kill path fired after the graceful timeout.
    pub forced: bool,
    /// Exit code, when the status was observable.
    pub exit_code: Option<i32>,
}

/// Tail of a process's captured output.
#[derive(Debug, Clone, Default)]
pub struct LogTail {
    /// Last lines of stdout.
    pub stdout: Vec<String>,
    /// Last lines of stderr.
    pub stderr: Vec<String>,
}

/// Owns spawning, signaling, and all lifecycle state transitions.
pub struct Controller {
    registry: Arc<Registry>,
    cfg: Arc<ManagerConfig>,
    bus: Bus,
    /// Live child handles, keyed by record id.
    children: Mutex<HashMap<String, RunnerChild>>,
    /// Consecutive automatic-restart failures, keyed by record id.
    streaks: Mutex<HashMap<String, u32>>,
    /// Cancels pending restart actors on shutdown.
    runtime_token: CancellationToken,
}

impl Controller {
    /// Creates a controller bound to the given registry and event bus.
    pub fn new(
        registry: Arc<Registry>,
        cfg: Arc<ManagerConfig>,
        bus: Bus,
        runtime_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            cfg,
            bus,
            children: Mutex::new(HashMap::new()),
            streaks: Mutex::new(HashMap::new()),
            runtime_token,
        })
    }

    // ---------------------------
    // Operator surface
    // ---------------------------

    /// Starts a registered process, bringing its dependencies up first.
    ///
    /// Rejects records already in a running-family state. A manual start
    /// clears the backoff streak but never touches `restart_count`.
    pub async fn start(&self, id: &str) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        if record.state.is_running_family() {
            return Err(Error::InvalidState {
                op: "start",
                name: record.config.name,
                state: record.state,
            });
        }
        self.streaks.lock().await.remove(id);
        let mut chain = Vec::new();
        self.start_inner(record, &mut chain).await
    }

    /// Stops a starting/running process.
    ///
    /// Sends the cooperative termination signal, waits up to `timeout` for
    /// exit, then force-kills. Always settles in `stopped`; the outcome
    /// records whether force was needed, and the record keeps the manual
    /// stop kind so automatic recovery leaves it alone.
    pub async fn stop(
        &self,
        id: &str,
        graceful: bool,
        timeout: Duration,
    ) -> Result<StopOutcome, Error> {
        let record = self.registry.get(id).await?;
        let claimed = self
            .registry
            .transition(
                id,
                &[ProcessState::Starting, ProcessState::Running],
                ProcessState::Stopping,
            )
            .await?;
        if !claimed {
            let current = self.registry.get(id).await?;
            return Err(Error::InvalidState {
                op: "stop",
                name: current.config.name,
                state: current.state,
            });
        }

        let name = record.config.name.clone();
        self.bus
            .publish(Event::now(EventKind::ProcessStopping).with_process(name.as_str()));
        self.streaks.lock().await.remove(id);

        let child = self.children.lock().await.remove(id);
        let outcome = match child {
            Some(mut child) => shutdown_child(&mut child, graceful, timeout).await,
            None => shutdown_detached(record.pid, graceful, timeout).await,
        };

        let kind = if outcome.forced {
            StopKind::ManualForced
        } else {
            StopKind::ManualGraceful
        };
        self.registry
            .update(
                id,
                RecordPatch::state(ProcessState::Stopped).with_stop_kind(Some(kind)),
            )
            .await?;
        self.bus.publish(
            Event::now(EventKind::ProcessStopped)
                .with_process(name.as_str())
                .with_exit_code(outcome.exit_code),
        );
        Ok(outcome)
    }

    /// Stops (when running) and starts the process again.
    ///
    /// Operator-initiated; never changes `restart_count`.
    pub async fn restart(&self, id: &str) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        match record.state {
            ProcessState::Starting | ProcessState::Running => {
                self.stop(id, true, self.cfg.stop_timeout).await?;
                if !self.cfg.restart_pause.is_zero() {
                    tokio::time::sleep(self.cfg.restart_pause).await;
                }
            }
            ProcessState::Stopping => {
                return Err(Error::InvalidState {
                    op: "restart",
                    name: record.config.name,
                    state: record.state,
                });
            }
            _ => {}
        }
        self.start(id).await
    }

    /// Re-arms a terminally failed record: back to `registered`, restart
    /// counter zeroed, error cleared.
    pub async fn reset(&self, id: &str) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        if record.state != ProcessState::Failed {
            return Err(Error::InvalidState {
                op: "reset",
                name: record.config.name,
                state: record.state,
            });
        }
        self.registry
            .update(
                id,
                RecordPatch::state(ProcessState::Registered)
                    .with_restart_count(0)
                    .clear_error()
                    .with_stop_kind(None),
            )
            .await?;
        self.streaks.lock().await.remove(id);
        Ok(())
    }

    /// Deletes a record; running-family records are rejected unless `force`,
    /// which stops them first.
    pub async fn unregister(&self, id: &str, force: bool) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        if record.state.is_running_family() {
            if !force {
                return Err(Error::InvalidState {
                    op: "unregister",
                    name: record.config.name,
                    state: record.state,
                });
            }
            self.stop(id, true, self.cfg.stop_timeout).await?;
        }
        self.registry.delete(id).await?;
        self.streaks.lock().await.remove(id);
        self.children.lock().await.remove(id);
        self.bus.publish(
            Event::now(EventKind::ProcessDeregistered).with_process(record.config.name.as_str()),
        );
        Ok(())
    }

    /// Returns the last `lines` lines of the process's captured output.
    pub async fn logs(&self, id: &str, lines: usize) -> Result<LogTail, Error> {
        let record = self.registry.get(id).await?;
        let name = &record.config.name;
        Ok(LogTail {
            stdout: tail_file(&self.cfg.stdout_log(name), lines).await?,
            stderr: tail_file(&self.cfg.stderr_log(name), lines).await?,
        })
    }

    /// Stops every running-family process, gracefully within `grace`.
    ///
    /// Returns [`Error::GraceExceeded`] naming the processes that ignored
    /// the termination signal and had to be force-killed.
    pub async fn stop_all(&self, grace: Duration) -> Result<(), Error> {
        let records = self.registry.list(ListFilter::default()).await?;
        let active: Vec<ProcessRecord> = records
            .into_iter()
            .filter(|r| r.state.is_running_family())
            .collect();

        let stops = active.iter().map(|record| async move {
            match self.stop(&record.id, true, grace).await {
                Ok(outcome) if outcome.forced => Some(record.config.name.clone()),
                _ => None,
            }
        });
        let stuck: Vec<String> = futures::future::join_all(stops)
            .await
            .into_iter()
            .flatten()
            .collect();

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(Error::GraceExceeded { grace, stuck })
        }
    }

    // ---------------------------
    // Monitor surface
    // ---------------------------

    /// Non-blocking reap of an owned child; `Some` once it has exited.
    pub async fn poll_exit(&self, id: &str) -> Option<ExitKind> {
        let mut children = self.children.lock().await;
        let child = children.get_mut(id)?;
        match child.try_wait() {
            Ok(Some(status)) => {
                children.remove(id);
                Some(ExitKind::from_status(&status))
            }
            _ => None,
        }
    }

    /// Applies the restart policy to a process that exited outside of an
    /// operator stop.
    ///
    /// `was_manual_stop` short-circuits: the stop path has already settled
    /// the record.
    pub async fn handle_exit(
        self: &Arc<Self>,
        id: &str,
        exit_code: Option<i32>,
        was_manual_stop: bool,
    ) -> Result<(), Error> {
        if was_manual_stop {
            return Ok(());
        }
        let record = self.registry.get(id).await?;
        if record.state != ProcessState::Running {
            return Ok(());
        }
        self.children.lock().await.remove(id);
        let exit = ExitKind::from_code(exit_code);
        self.bus.publish(
            Event::now(EventKind::ProcessExited)
                .with_process(record.config.name.as_str())
                .with_exit_code(exit_code),
        );
        self.settle_exit(record, exit, None).await
    }

    /// Terminates an unhealthy-but-alive process and applies the restart
    /// policy as if it had exited abnormally.
    pub async fn handle_unhealthy(self: &Arc<Self>, id: &str, reason: &str) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        if record.state != ProcessState::Running {
            return Ok(());
        }
        let child = self.children.lock().await.remove(id);
        match child {
            Some(mut child) => {
                shutdown_child(&mut child, true, self.cfg.stop_timeout).await;
            }
            None => {
                shutdown_detached(record.pid, true, self.cfg.stop_timeout).await;
            }
        }
        self.settle_exit(record, ExitKind::Unknown, Some(reason.to_string()))
            .await
    }

    // ---------------------------
    // Start internals
    // ---------------------------

    fn start_inner<'a>(
        &'a self,
        record: ProcessRecord,
        chain: &'a mut Vec<(String, String)>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if chain.iter().any(|(id, _)| *id == record.id) {
                let mut names: Vec<String> = chain.iter().map(|(_, n)| n.clone()).collect();
                names.push(record.config.name.clone());
                return Err(Error::DependencyCycle { chain: names });
            }
            chain.push((record.id.clone(), record.config.name.clone()));

            for dep_name in &record.config.dependencies {
                let dep = match self.registry.get_by_name(dep_name).await {
                    Ok(dep) => dep,
                    Err(Error::NotFound { .. }) => {
                        let reason = format!("dependency '{dep_name}' is not registered");
                        let _ = self
                            .registry
                            .update(
                                &record.id,
                                RecordPatch::state(ProcessState::Failed).with_error(&reason),
                            )
                            .await;
                        self.bus.publish(
                            Event::now(EventKind::ProcessFailed)
                                .with_process(record.config.name.as_str())
                                .with_reason(reason),
                        );
                        return Err(Error::DependencyNotFound {
                            dependent: record.config.name.clone(),
                            missing: dep_name.clone(),
                        });
                    }
                    Err(e) => return Err(e),
                };
                if !matches!(dep.state, ProcessState::Starting | ProcessState::Running) {
                    self.start_inner(dep, chain).await?;
                }
            }

            let result = self.claim_and_spawn(&record.id).await;
            chain.pop();
            result
        })
    }

    /// Claims the `starting` state and spawns; a lost claim against a record
    /// that is already coming up (or up) is a benign no-op.
    async fn claim_and_spawn(&self, id: &str) -> Result<(), Error> {
        let claimed = self
            .registry
            .transition(
                id,
                &[
                    ProcessState::Registered,
                    ProcessState::Stopped,
                    ProcessState::Failed,
                ],
                ProcessState::Starting,
            )
            .await?;
        if !claimed {
            let current = self.registry.get(id).await?;
            if current.state.is_running_family() {
                return Ok(());
            }
            return Err(Error::InvalidState {
                op: "start",
                name: current.config.name,
                state: current.state,
            });
        }
        self.spawn_claimed(id).await
    }

    /// Spawns the process for a record already claimed into `starting`.
    ///
    /// On success the record moves to `running` with its pid; if an
    /// operator stop won the record while the spawn was in flight, the
    /// fresh child is killed and the call is a no-op.
    async fn spawn_claimed(&self, id: &str) -> Result<(), Error> {
        let record = self.registry.get(id).await?;
        let name = record.config.name.clone();
        self.bus
            .publish(Event::now(EventKind::ProcessStarting).with_process(name.as_str()));

        let request = self.spawn_request(&record);
        let runner = runner_for(record.config.kind);
        match runner.spawn(&request).await {
            Ok(mut child) => {
                let pid = child.pid();
                let moved = self
                    .registry
                    .transition_patch(
                        id,
                        &[ProcessState::Starting],
                        RecordPatch::state(ProcessState::Running).with_pid(Some(pid)),
                    )
                    .await?;
                if !moved {
                    let _ = child.kill().await;
                    return Ok(());
                }
                self.children.lock().await.insert(id.to_string(), child);
                self.bus.publish(
                    Event::now(EventKind::ProcessStarted)
                        .with_process(name.as_str())
                        .with_pid(pid),
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                let moved = self
                    .registry
                    .transition_patch(
                        id,
                        &[ProcessState::Starting],
                        RecordPatch::state(ProcessState::Failed).with_error(&reason),
                    )
                    .await?;
                if moved {
                    self.bus.publish(
                        Event::now(EventKind::ProcessFailed)
                            .with_process(name.as_str())
                            .with_reason(reason),
                    );
                }
                Err(e)
            }
        }
    }

    fn spawn_request(&self, record: &ProcessRecord) -> SpawnRequest {
        SpawnRequest {
            id: record.id.clone(),
            config: record.config.clone(),
            env: self.build_env(record),
            stdout: self.cfg.stdout_log(&record.config.name),
            stderr: self.cfg.stderr_log(&record.config.name),
        }
    }

    /// Builds the child environment: inherited variables minus the deny
    /// list, overlaid with the config's own, plus the identification and
    /// heartbeat-channel variables and `PORT` from the first declared port.
    pub(crate) fn build_env(&self, record: &ProcessRecord) -> Vec<(String, String)> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        for key in ENV_DENY_LIST {
            env.remove(*key);
        }
        for (key, value) in &record.config.env {
            env.insert(key.clone(), value.clone());
        }
        env.insert(heartbeat::ENV_PROCESS_ID.to_string(), record.id.clone());
        env.insert(
            heartbeat::ENV_HEARTBEAT_SOCKET.to_string(),
            self.cfg.heartbeat_socket().display().to_string(),
        );
        env.insert(
            heartbeat::ENV_HEARTBEAT_INTERVAL_SECS.to_string(),
            self.cfg.heartbeat_interval.as_secs().to_string(),
        );
        if let Some(port) = record.config.ports.first() {
            env.insert("PORT".to_string(), port.to_string());
        }
        env.into_iter().collect()
    }

    // ---------------------------
    // Recovery internals
    // ---------------------------

    /// Settles an exited/unhealthy record: either schedule recovery or land
    /// it in its terminal state.
    async fn settle_exit(
        self: &Arc<Self>,
        record: ProcessRecord,
        exit: ExitKind,
        reason: Option<String>,
    ) -> Result<(), Error> {
        let manual = record.stop_kind.is_some();
        if record.config.restart_policy.should_restart(exit, manual) {
            let prev_uptime = record
                .started_at
                .and_then(|t| Utc::now().signed_duration_since(t).to_std().ok());
            return Arc::clone(self)
                .schedule_auto_restart(record, prev_uptime, reason)
                .await;
        }

        let (state, message) = match exit {
            ExitKind::Clean => (ProcessState::Stopped, None),
            ExitKind::Abnormal(code) => (
                ProcessState::Failed,
                Some(reason.unwrap_or_else(|| format!("process exited with code {code}"))),
            ),
            ExitKind::Unknown => (
                ProcessState::Failed,
                Some(reason.unwrap_or_else(|| "process exited unexpectedly".to_string())),
            ),
        };
        let mut patch = RecordPatch::state(state);
        if let Some(ref message) = message {
            patch = patch.with_error(message.clone());
        }
        let moved = self
            .registry
            .transition_patch(
                &record.id,
                &[ProcessState::Running, ProcessState::Starting],
                patch,
            )
            .await?;
        if moved {
            let event = match state {
                ProcessState::Stopped => {
                    Event::now(EventKind::ProcessStopped).with_exit_code(exit.code())
                }
                _ => {
                    let mut ev = Event::now(EventKind::ProcessFailed);
                    if let Some(message) = message {
                        ev = ev.with_reason(message);
                    }
                    ev
                }
            };
            self.bus
                .publish(event.with_process(record.config.name.as_str()));
        }
        Ok(())
    }

    /// Dispatches one automatic restart attempt behind the backoff delay,
    /// or lands the record in `failed` once retries are exhausted.
    ///
    /// Boxed because the restart actor re-enters this path when a re-spawn
    /// attempt itself fails.
    fn schedule_auto_restart(
        self: Arc<Self>,
        record: ProcessRecord,
        prev_uptime: Option<Duration>,
        reason: Option<String>,
    ) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin(async move {
            let name = record.config.name.clone();

            if record.restart_count >= record.config.max_retries {
                let message = Error::RestartLimitExceeded {
                    name: name.clone(),
                    max_retries: record.config.max_retries,
                }
                .to_string();
                let moved = self
                    .registry
                    .transition_patch(
                        &record.id,
                        &[
                            ProcessState::Running,
                            ProcessState::Starting,
                            ProcessState::Failed,
                        ],
                        RecordPatch::state(ProcessState::Failed).with_error(&message),
                    )
                    .await?;
                if moved {
                    self.bus.publish(
                        Event::now(EventKind::ProcessFailed)
                            .with_process(name.as_str())
                            .with_attempt(record.restart_count)
                            .with_reason(message),
                    );
                }
                return Ok(());
            }

            // Hold the record in `starting` while the backoff actor sleeps;
            // an operator stop during the sleep wins this slot and the
            // actor aborts on wake.
            let moved = self
                .registry
                .transition(
                    &record.id,
                    &[
                        ProcessState::Running,
                        ProcessState::Starting,
                        ProcessState::Failed,
                    ],
                    ProcessState::Starting,
                )
                .await?;
            if !moved {
                return Ok(());
            }

            let attempt = self.registry.increment_restart_count(&record.id).await?;
            let streak = self.next_streak(&record.id, prev_uptime).await;
            let delay = self.cfg.backoff.delay_for(streak);

            let mut event = Event::now(EventKind::RestartScheduled)
                .with_process(name.as_str())
                .with_attempt(attempt)
                .with_delay(delay);
            if let Some(reason) = reason {
                event = event.with_reason(reason);
            }
            self.bus.publish(event);

            let actor = Arc::clone(&self);
            let id = record.id.clone();
            let token = self.runtime_token.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                actor.run_restart_attempt(id).await;
            });
            Ok(())
        })
    }

    /// One restart-actor wakeup: re-spawn if the slot is still pending.
    async fn run_restart_attempt(self: Arc<Self>, id: String) {
        let record = match self.registry.get(&id).await {
            Ok(record) => record,
            Err(_) => return,
        };
        if record.state != ProcessState::Starting {
            // An operator stop or deregistration won the slot meanwhile.
            return;
        }
        if let Err(e) = self.spawn_claimed(&id).await {
            tracing::warn!(
                target: "procvisor::controller",
                process = %record.config.name,
                error = %e,
                "automatic restart attempt failed"
            );
            if let Ok(record) = self.registry.get(&id).await {
                let reason = e.to_string();
                if let Err(e) = Arc::clone(&self)
                    .schedule_auto_restart(record, None, Some(reason))
                    .await
                {
                    tracing::warn!(
                        target: "procvisor::controller",
                        id = %id,
                        error = %e,
                        "could not schedule the next restart attempt"
                    );
                }
            }
        }
    }

    /// Next backoff streak value; resets when the dead instance had
    /// survived past the minimum uptime.
    async fn next_streak(&self, id: &str, prev_uptime: Option<Duration>) -> u32 {
        let mut streaks = self.streaks.lock().await;
        let slot = streaks.entry(id.to_string()).or_insert(0);
        if prev_uptime.is_some_and(|uptime| uptime >= self.cfg.min_uptime) {
            *slot = 0;
        }
        let current = *slot;
        *slot += 1;
        current
    }
}

// ---------------------------
// Termination plumbing
// ---------------------------

/// Terminates an owned child: signal, bounded wait, then force kill.
async fn shutdown_child(child: &mut RunnerChild, graceful: bool, timeout: Duration) -> StopOutcome {
    if graceful {
        child.terminate();
        if let Ok(Ok(status)) = tokio::time::timeout(timeout, child.wait()).await {
            return StopOutcome {
                forced: false,
                exit_code: status.code(),
            };
        }
    }
    let _ = child.kill().await;
    let exit_code = child.wait().await.ok().and_then(|status| status.code());
    StopOutcome {
        forced: true,
        exit_code,
    }
}

/// Terminates a pid we hold no handle for (records that outlived a manager
/// restart): signal and poll the process table until it is gone.
async fn shutdown_detached(pid: Option<u32>, graceful: bool, timeout: Duration) -> StopOutcome {
    let Some(pid) = pid else {
        return StopOutcome {
            forced: false,
            exit_code: None,
        };
    };
    if !probe::pid_alive_oneshot(pid) {
        return StopOutcome {
            forced: false,
            exit_code: None,
        };
    }
    if graceful {
        runner::terminate_pid(pid);
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(DETACHED_POLL).await;
            if !probe::pid_alive_oneshot(pid) {
                return StopOutcome {
                    forced: false,
                    exit_code: None,
                };
            }
        }
    }
    runner::kill_pid(pid);
    for _ in 0..10 {
        if !probe::pid_alive_oneshot(pid) {
            break;
        }
        tokio::time::sleep(DETACHED_POLL).await;
    }
    StopOutcome {
        forced: true,
        exit_code: None,
    }
}

async fn tail_file(path: &std::path::Path, lines: usize) -> Result<Vec<String>, Error> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let mut tail: Vec<String> = contents.lines().rev().take(lines).map(String::from).collect();
            tail.reverse();
            Ok(tail)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
