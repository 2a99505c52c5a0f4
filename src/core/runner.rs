//! # Pluggable process runners.
//!
//! A [`Runner`] turns a spawn request into a live OS process. The config's
//! type tag selects the concrete runner: [`SubprocessRunner`] covers the
//! interpreter and shell types, [`DockerRunner`] wraps the command in
//! `docker run`. Both hand back a [`RunnerChild`], the handle the
//! controller keeps for signaling, reaping, and forced termination.
//!
//! ## Rules
//! - The runner receives a fully built environment and applies it with
//!   `env_clear`; nothing leaks from the manager's own environment.
//! - Child stdout/stderr append to per-process log files.
//! - A memory ceiling maps to an address-space rlimit for subprocess types
//!   and to `--memory` for docker; cpu shares are docker-only.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::error::Error;
use crate::process::{ProcessConfig, ProcessType, ResourceLimits};

/// Everything a runner needs to create one OS process.
pub struct SpawnRequest {
    /// Record id, used in diagnostics.
    pub id: String,
    /// Definition snapshot.
    pub config: ProcessConfig,
    /// Fully built child environment (sanitized base + overrides + injected
    /// identification variables).
    pub env: Vec<(String, String)>,
    /// File receiving the child's stdout (appended).
    pub stdout: PathBuf,
    /// File receiving the child's stderr (appended).
    pub stderr: PathBuf,
}

/// Capability interface for creating OS-level processes.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Spawns the process described by `req`.
    async fn spawn(&self, req: &SpawnRequest) -> Result<RunnerChild, Error>;
}

/// Handle to a spawned OS process.
pub struct RunnerChild {
    child: Child,
    pid: u32,
}

impl RunnerChild {
    fn new(child: Child, pid: u32) -> Self {
        Self { child, pid }
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends the cooperative termination signal (SIGTERM on Unix).
    ///
    /// Non-Unix platforms have no cooperative equivalent; callers fall
    /// through to [`RunnerChild::kill`] after the timeout either way.
    pub fn terminate(&self) {
        terminate_pid(self.pid);
    }

    /// Force-kills the process (SIGKILL equivalent) and reaps it.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Waits for the process to exit.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Non-blocking exit check; `Some` once the process has been reaped.
    pub fn try_wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }
}

/// Runner for the interpreter, shell, and custom process types.
#[derive(Default)]
pub struct SubprocessRunner;

#[async_trait]
impl Runner for SubprocessRunner {
    async fn spawn(&self, req: &SpawnRequest) -> Result<RunnerChild, Error> {
        let argv = prepare_command(&req.config)?;
        let mut cmd = base_command(&argv, req)?;
        apply_rlimits(&mut cmd, req.config.resource_limits.as_ref());
        spawn_child(cmd, &req.config.name)
    }
}

/// Runner for containerized units, delegating to the docker CLI.
#[derive(Default)]
pub struct DockerRunner;

#[async_trait]
impl Runner for DockerRunner {
    async fn spawn(&self, req: &SpawnRequest) -> Result<RunnerChild, Error> {
        let argv = prepare_command(&req.config)?;
        let cmd = base_command(&argv, req)?;
        spawn_child(cmd, &req.config.name)
    }
}

fn base_command(argv: &[String], req: &SpawnRequest) -> Result<Command, Error> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::SpawnFailure {
        name: req.config.name.clone(),
        reason: "empty command".into(),
    })?;

    let stdout = open_log(&req.stdout, &req.config.name)?;
    let stderr = open_log(&req.stderr, &req.config.name)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(absolute_workdir(&req.config.workdir))
        .env_clear()
        .envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    Ok(cmd)
}

fn spawn_child(mut cmd: Command, name: &str) -> Result<RunnerChild, Error> {
    let child = cmd.spawn().map_err(|e| Error::SpawnFailure {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    let pid = child.id().ok_or_else(|| Error::SpawnFailure {
        name: name.to_string(),
        reason: "child exited before its pid could be observed".into(),
    })?;
    Ok(RunnerChild::new(child, pid))
}

fn open_log(path: &Path, name: &str) -> Result<std::fs::File, Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::SpawnFailure {
            name: name.to_string(),
            reason: format!("cannot create log directory: {e}"),
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::SpawnFailure {
            name: name.to_string(),
            reason: format!("cannot open log file {}: {e}", path.display()),
        })
}

fn absolute_workdir(workdir: &Path) -> PathBuf {
    if workdir.is_absolute() {
        workdir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(workdir))
            .unwrap_or_else(|_| workdir.to_path_buf())
    }
}

#[cfg(unix)]
fn apply_rlimits(cmd: &mut Command, limits: Option<&ResourceLimits>) {
    let Some(bytes) = limits
        .and_then(|l| l.memory_mb)
        .map(|mb| mb.saturating_mul(1024 * 1024))
    else {
        return;
    };
    // SAFETY: setrlimit is async-signal-safe; nothing else runs in the
    // forked child before exec.
    unsafe {
        cmd.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: bytes as libc::rlim_t,
                rlim_max: bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_rlimits(_cmd: &mut Command, _limits: Option<&ResourceLimits>) {}

/// Builds the argument vector for the config's process type.
pub(crate) fn prepare_command(config: &ProcessConfig) -> Result<Vec<String>, Error> {
    let command = config.command.trim();
    if command.is_empty() {
        return Err(Error::SpawnFailure {
            name: config.name.clone(),
            reason: "empty command".into(),
        });
    }

    let argv = match config.kind {
        ProcessType::Python => vec!["python3".into(), "-u".into(), command.into()],
        ProcessType::Nodejs => vec!["node".into(), command.into()],
        ProcessType::Shell => vec!["sh".into(), "-c".into(), command.into()],
        ProcessType::Custom => command.split_whitespace().map(String::from).collect(),
        ProcessType::Docker => {
            let mut argv: Vec<String> = vec!["docker".into(), "run".into()];
            if let Some(limits) = &config.resource_limits {
                if let Some(mb) = limits.memory_mb {
                    argv.push("--memory".into());
                    argv.push(format!("{mb}m"));
                }
                if let Some(shares) = limits.cpu_shares {
                    argv.push("--cpu-shares".into());
                    argv.push(shares.to_string());
                }
            }
            argv.extend(command.split_whitespace().map(String::from));
            argv
        }
    };
    Ok(argv)
}

/// Sends SIGTERM to an arbitrary pid (no-op off Unix).
pub(crate) fn terminate_pid(pid: u32) {
    #[cfg(unix)]
    // SAFETY: plain kill(2); a stale pid at worst returns ESRCH.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Sends SIGKILL to an arbitrary pid (no-op off Unix).
pub(crate) fn kill_pid(pid: u32) {
    #[cfg(unix)]
    // SAFETY: plain kill(2); a stale pid at worst returns ESRCH.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Selects the runner for a process type tag.
pub(crate) fn runner_for(kind: ProcessType) -> &'static dyn Runner {
    static SUBPROCESS: SubprocessRunner = SubprocessRunner;
    static DOCKER: DockerRunner = DockerRunner;
    match kind {
        ProcessType::Docker => &DOCKER,
        _ => &SUBPROCESS,
    }
}
