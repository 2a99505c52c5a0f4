//! # Process definition documents.
//!
//! [`ProcessConfig`] is the immutable definition a process is registered
//! with. It deserializes from the structured document accepted by the
//! external command layer:
//!
//! ```json
//! {
//!   "name": "api",
//!   "command": "server.py",
//!   "type": "python",
//!   "workdir": "/srv/api",
//!   "env": { "LOG_LEVEL": "debug" },
//!   "ports": [8080],
//!   "health_check": "/healthz",
//!   "restart_policy": "on-failure",
//!   "max_retries": 3,
//!   "dependencies": ["db"],
//!   "resource_limits": { "memory_mb": 512 }
//! }
//! ```
//!
//! [`load_documents`] is the batch convenience: a JSON array of such
//! documents, registered one by one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::policies::RestartPolicy;

/// Process type tag; selects the runner and command preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessType {
    /// Interpreted Python script, launched unbuffered via `python3 -u`.
    Python,
    /// Node.js script, launched via `node`.
    Nodejs,
    /// Shell command line, launched via `sh -c` (default).
    #[default]
    Shell,
    /// Containerized unit, launched via `docker run`.
    Docker,
    /// Pre-split argument vector, launched as-is.
    Custom,
}

/// Optional resource ceilings applied at spawn time.
///
/// `memory_mb` maps to an address-space rlimit for subprocess types and to
/// `--memory` for docker. `cpu_shares` is honored by the docker runner only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in mebibytes.
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Relative CPU weight (docker `--cpu-shares`).
    #[serde(default)]
    pub cpu_shares: Option<u64>,
}

/// Immutable definition of a managed process.
///
/// Replaceable only by deregistering and registering again under the same
/// name; the registry embeds a snapshot of it in every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Unique process name.
    pub name: String,
    /// Command to run, interpreted according to `type`.
    pub command: String,
    /// Process type tag.
    #[serde(rename = "type", default)]
    pub kind: ProcessType,
    /// Working directory; relative paths resolve against the manager's cwd.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Environment overrides layered over the sanitized base environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Declared network ports; the first one doubles as the health-check
    /// port and is exported as `PORT`.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Optional HTTP health-check path (e.g. `/healthz`).
    #[serde(default)]
    pub health_check: Option<String>,
    /// Automatic recovery policy.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Ceiling on automatically-triggered restarts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Names of processes that must be running before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional resource ceilings.
    #[serde(default)]
    pub resource_limits: Option<ResourceLimits>,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_retries() -> u32 {
    3
}

impl ProcessConfig {
    /// Creates a shell-type definition with defaults for everything else.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            kind: ProcessType::default(),
            workdir: default_workdir(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            health_check: None,
            restart_policy: RestartPolicy::default(),
            max_retries: default_max_retries(),
            dependencies: Vec::new(),
            resource_limits: None,
        }
    }

    /// Sets the process type tag.
    pub fn with_kind(mut self, kind: ProcessType) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the working directory.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Adds one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the declared ports.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Sets the health-check path.
    pub fn with_health_check(mut self, path: impl Into<String>) -> Self {
        self.health_check = Some(path.into());
        self
    }

    /// Sets the restart policy.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Sets the restart ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the dependency list.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the resource limits.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }
}

/// Loads a JSON array of process documents from disk.
pub fn load_documents(path: &Path) -> Result<Vec<ProcessConfig>, Error> {
    let raw = std::fs::read_to_string(path)?;
    let docs: Vec<ProcessConfig> = serde_json::from_str(&raw)?;
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn document_defaults_apply() {
        let config: ProcessConfig =
            serde_json::from_str(r#"{ "name": "svc1", "command": "sleep 100" }"#).unwrap();
        assert_eq!(config.kind, ProcessType::Shell);
        assert_eq!(config.workdir, PathBuf::from("."));
        assert_eq!(config.restart_policy, RestartPolicy::OnFailure);
        assert_eq!(config.max_retries, 3);
        assert!(config.env.is_empty());
        assert!(config.dependencies.is_empty());
        assert!(config.resource_limits.is_none());
    }

    #[test]
    fn full_document_parses() {
        let config: ProcessConfig = serde_json::from_str(
            r#"{
                "name": "api",
                "command": "server.py",
                "type": "python",
                "workdir": "/srv/api",
                "env": { "LOG_LEVEL": "debug" },
                "ports": [8080, 8081],
                "health_check": "/healthz",
                "restart_policy": "always",
                "max_retries": 5,
                "dependencies": ["db"],
                "resource_limits": { "memory_mb": 512, "cpu_shares": 256 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.kind, ProcessType::Python);
        assert_eq!(config.ports, vec![8080, 8081]);
        assert_eq!(config.health_check.as_deref(), Some("/healthz"));
        assert_eq!(config.restart_policy, RestartPolicy::Always);
        assert_eq!(config.dependencies, vec!["db".to_string()]);
        assert_eq!(
            config.resource_limits,
            Some(ResourceLimits {
                memory_mb: Some(512),
                cpu_shares: Some(256),
            })
        );
    }

    #[test]
    fn batch_documents_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{ "name": "db", "command": "sleep 100" }},
                {{ "name": "api", "command": "sleep 100", "dependencies": ["db"] }}
            ]"#
        )
        .unwrap();
        let docs = load_documents(file.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name, "db");
        assert_eq!(docs[1].dependencies, vec!["db".to_string()]);
    }

    #[test]
    fn malformed_batch_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{ "name": "db" }}]"#).unwrap();
        assert!(matches!(
            load_documents(file.path()),
            Err(Error::Serde(_))
        ));
    }
}
