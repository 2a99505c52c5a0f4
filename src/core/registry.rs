//! # Durable process registry.
//!
//! [`Registry`] owns the SQLite store of process definitions and runtime
//! state. It is the single shared mutable resource of the runtime: the
//! controller writes lifecycle state through it, the monitor and heartbeat
//! channel write auxiliary fields, and everything reads it as the source of
//! truth.
//!
//! ## Serialization
//! All statements execute on the connection's single worker, one closure at
//! a time, so every multi-step mutation (check-then-insert, conditional
//! transition) is atomic and totally ordered. No lock is ever held across an
//! await point; a dependency-driven recursive start simply issues nested
//! sequential calls, which is why recursion through the registry cannot
//! deadlock.
//!
//! ## Schema
//! One row per process keyed by a generated id, with a unique index on
//! `name` and indexes on `state` and `last_heartbeat` so that "list by
//! state" and "list unhealthy" stay cheap for external tooling reading the
//! database directly.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::core::probe::MetricsSnapshot;
use crate::error::Error;
use crate::process::{ProcessConfig, ProcessRecord, ProcessState, StopKind};

const COLUMNS: &str = "id, name, config, state, pid, started_at, stopped_at, \
     restart_count, last_heartbeat, error_message, metrics, stop_kind, \
     created_at, updated_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processes (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    config         TEXT NOT NULL,
    state          TEXT NOT NULL,
    pid            INTEGER,
    started_at     TEXT,
    stopped_at     TEXT,
    restart_count  INTEGER NOT NULL DEFAULT 0,
    last_heartbeat TEXT,
    error_message  TEXT,
    metrics        TEXT,
    stop_kind      TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_processes_name ON processes(name);
CREATE INDEX IF NOT EXISTS idx_processes_state ON processes(state);
CREATE INDEX IF NOT EXISTS idx_processes_heartbeat ON processes(last_heartbeat);
";

/// Filter for [`Registry::list`]; empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Keep only records in this state.
    pub state: Option<ProcessState>,
    /// Keep only records whose name contains this substring.
    pub name_contains: Option<String>,
}

impl ListFilter {
    /// Filter by state only.
    pub fn by_state(state: ProcessState) -> Self {
        Self {
            state: Some(state),
            name_contains: None,
        }
    }

    /// Filter by name substring only.
    pub fn by_name(fragment: impl Into<String>) -> Self {
        Self {
            state: None,
            name_contains: Some(fragment.into()),
        }
    }
}

/// Partial update merged atomically into a record.
///
/// `Option<Option<T>>` fields distinguish "leave unchanged" (outer `None`)
/// from "set to NULL" (inner `None`). Every update bumps `updated_at`;
/// state changes additionally stamp `started_at`/`stopped_at` and clear
/// `pid` the way the lifecycle demands.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub state: Option<ProcessState>,
    pub pid: Option<Option<u32>>,
    pub restart_count: Option<u32>,
    pub error_message: Option<Option<String>>,
    pub last_heartbeat: Option<Option<DateTime<Utc>>>,
    pub stop_kind: Option<Option<StopKind>>,
}

impl RecordPatch {
    /// Starts a patch that moves the record to `state`.
    pub fn state(state: ProcessState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Sets or clears the pid.
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Sets the error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    /// Clears the error message.
    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    /// Sets the restart counter.
    pub fn with_restart_count(mut self, count: u32) -> Self {
        self.restart_count = Some(count);
        self
    }

    /// Sets or clears the stop kind.
    pub fn with_stop_kind(mut self, kind: Option<StopKind>) -> Self {
        self.stop_kind = Some(kind);
        self
    }

    /// Sets or clears the heartbeat timestamp.
    pub fn with_heartbeat(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_heartbeat = Some(at);
        self
    }
}

enum DeleteOutcome {
    Deleted,
    Missing,
    Busy(ProcessState, String),
}

/// SQLite-backed store of process records.
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Opens (creating if needed) the registry database at `path`.
    ///
    /// WAL journaling and a busy timeout are applied so a co-located
    /// inspection tool reading the file never wedges the runtime.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Opens an ephemeral in-memory registry (tests, dry runs).
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Creates a record in state `registered` and returns its id.
    ///
    /// Fails with [`Error::DuplicateName`] when a live record with the same
    /// name exists; the existing record is left untouched.
    pub async fn register(&self, config: ProcessConfig) -> Result<String, Error> {
        let name = config.name.clone();
        let config_json = serde_json::to_string(&config)?;
        let id = Uuid::new_v4().to_string();
        let now = now_text();

        let inserted = {
            let id = id.clone();
            let name = name.clone();
            self.conn
                .call(move |conn| {
                    let existing: Option<String> = conn
                        .query_row(
                            "SELECT id FROM processes WHERE name = ?1",
                            params![name],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if existing.is_some() {
                        return Ok(false);
                    }
                    conn.execute(
                        "INSERT INTO processes (id, name, config, state, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        params![id, name, config_json, ProcessState::Registered.as_str(), now],
                    )?;
                    Ok(true)
                })
                .await?
        };

        if inserted {
            Ok(id)
        } else {
            Err(Error::DuplicateName { name })
        }
    }

    /// Fetches a record by id.
    pub async fn get(&self, id: &str) -> Result<ProcessRecord, Error> {
        self.fetch("id", id).await
    }

    /// Fetches a record by name.
    pub async fn get_by_name(&self, name: &str) -> Result<ProcessRecord, Error> {
        self.fetch("name", name).await
    }

    /// Fetches a record by id, falling back to name.
    pub async fn find(&self, key: &str) -> Result<ProcessRecord, Error> {
        let key_owned = key.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {COLUMNS} FROM processes WHERE id = ?1 OR name = ?1 LIMIT 1"
                );
                let found = conn
                    .query_row(&sql, params![key_owned], row_to_record)
                    .optional()?;
                Ok(found)
            })
            .await?;
        record.ok_or_else(|| Error::NotFound { key: key.into() })
    }

    async fn fetch(&self, column: &'static str, key: &str) -> Result<ProcessRecord, Error> {
        let key_owned = key.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {COLUMNS} FROM processes WHERE {column} = ?1");
                let found = conn
                    .query_row(&sql, params![key_owned], row_to_record)
                    .optional()?;
                Ok(found)
            })
            .await?;
        record.ok_or_else(|| Error::NotFound { key: key.into() })
    }

    /// Lists records matching the filter, in insertion order.
    pub async fn list(&self, filter: ListFilter) -> Result<Vec<ProcessRecord>, Error> {
        let records = self
            .conn
            .call(move |conn| {
                let mut sql = format!("SELECT {COLUMNS} FROM processes");
                let mut clauses: Vec<&str> = Vec::new();
                let mut args: Vec<Value> = Vec::new();
                if let Some(state) = filter.state {
                    clauses.push("state = ?");
                    args.push(Value::Text(state.as_str().to_string()));
                }
                if let Some(fragment) = filter.name_contains {
                    clauses.push("instr(name, ?) > 0");
                    args.push(Value::Text(fragment));
                }
                if !clauses.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&clauses.join(" AND "));
                }
                sql.push_str(" ORDER BY rowid ASC");

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(args), row_to_record)?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Lists `running` records whose last heartbeat is older than `cutoff`.
    ///
    /// Supports "list unhealthy" queries without touching state; records
    /// that never heartbeat are not reported.
    pub async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<ProcessRecord>, Error> {
        let cutoff = text_ts(cutoff);
        let records = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {COLUMNS} FROM processes \
                     WHERE state = 'running' AND last_heartbeat IS NOT NULL \
                       AND last_heartbeat < ?1 \
                     ORDER BY rowid ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![cutoff], row_to_record)?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Atomically merges `patch` into the record and bumps `updated_at`.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<(), Error> {
        let id_owned = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let mut assignments = patch_assignments(&patch);
                assign(&mut assignments, "updated_at", Value::Text(now_text()));
                let (sql, mut args) = render_update(&assignments);
                args.push(Value::Text(id_owned));
                let changed = conn.execute(&sql, params_from_iter(args))?;
                Ok(changed > 0)
            })
            .await?;
        if changed {
            Ok(())
        } else {
            Err(Error::NotFound { key: id.into() })
        }
    }

    /// Compare-and-swap state transition.
    ///
    /// Moves the record to `to` only if its current state is one of `from`,
    /// applying the same timestamp/pid side effects as [`Registry::update`].
    /// Returns `false` when the record exists but was in none of the `from`
    /// states (somebody else won the race).
    pub async fn transition(
        &self,
        id: &str,
        from: &[ProcessState],
        to: ProcessState,
    ) -> Result<bool, Error> {
        self.transition_patch(id, from, RecordPatch::state(to)).await
    }

    /// Compare-and-swap transition carrying extra patch fields.
    ///
    /// Like [`Registry::transition`], but merges the rest of `patch` (pid,
    /// error message, stop kind, ...) in the same atomic statement.
    /// `patch.state` must be set.
    pub async fn transition_patch(
        &self,
        id: &str,
        from: &[ProcessState],
        patch: RecordPatch,
    ) -> Result<bool, Error> {
        debug_assert!(patch.state.is_some(), "transition patch must carry a state");
        let id_owned = id.to_string();
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let moved = self
            .conn
            .call(move |conn| {
                let mut assignments = patch_assignments(&patch);
                assign(&mut assignments, "updated_at", Value::Text(now_text()));
                let (mut sql, mut args) = render_update(&assignments);
                args.push(Value::Text(id_owned.clone()));
                let placeholders: Vec<String> = (0..from.len())
                    .map(|i| format!("?{}", args.len() + i + 1))
                    .collect();
                sql.push_str(&format!(" AND state IN ({})", placeholders.join(", ")));
                args.extend(from.into_iter().map(Value::Text));

                let changed = conn.execute(&sql, params_from_iter(args))?;
                if changed > 0 {
                    return Ok(Some(true));
                }
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM processes WHERE id = ?1",
                        params![id_owned],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(exists.map(|_| false))
            })
            .await?;
        moved.ok_or_else(|| Error::NotFound { key: id.into() })
    }

    /// Deletes a record.
    ///
    /// Rejected with [`Error::InvalidState`] while the record is in a
    /// running-family state; stop it first (or use the controller's forced
    /// deregistration, which does).
    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let id_owned = id.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let current: Option<(String, String)> = conn
                    .query_row(
                        "SELECT state, name FROM processes WHERE id = ?1",
                        params![id_owned],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((state_text, name)) = current else {
                    return Ok(DeleteOutcome::Missing);
                };
                let state = parse_state(&state_text)?;
                if state.is_running_family() {
                    return Ok(DeleteOutcome::Busy(state, name));
                }
                conn.execute("DELETE FROM processes WHERE id = ?1", params![id_owned])?;
                Ok(DeleteOutcome::Deleted)
            })
            .await?;
        match outcome {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::Missing => Err(Error::NotFound { key: id.into() }),
            DeleteOutcome::Busy(state, name) => Err(Error::InvalidState {
                op: "delete",
                name,
                state,
            }),
        }
    }

    /// Writes `last_heartbeat = now` for the record, if it exists.
    ///
    /// Returns `false` for unknown ids; the heartbeat channel logs and
    /// drops those instead of failing.
    pub async fn touch_heartbeat(&self, id: &str) -> Result<bool, Error> {
        let id_owned = id.to_string();
        let touched = self
            .conn
            .call(move |conn| {
                let now = now_text();
                let changed = conn.execute(
                    "UPDATE processes SET last_heartbeat = ?1, updated_at = ?1 WHERE id = ?2",
                    params![now, id_owned],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(touched)
    }

    /// Stores the latest monitor metrics snapshot for the record.
    pub async fn store_metrics(&self, id: &str, snapshot: &MetricsSnapshot) -> Result<(), Error> {
        let id_owned = id.to_string();
        let json = serde_json::to_string(snapshot)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE processes SET metrics = ?1, updated_at = ?2 WHERE id = ?3",
                    params![json, now_text(), id_owned],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Increments the restart counter and returns the new value.
    pub async fn increment_restart_count(&self, id: &str) -> Result<u32, Error> {
        let id_owned = id.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE processes \
                     SET restart_count = restart_count + 1, updated_at = ?1 \
                     WHERE id = ?2",
                    params![now_text(), id_owned],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let count: u32 = conn.query_row(
                    "SELECT restart_count FROM processes WHERE id = ?1",
                    params![id_owned],
                    |row| row.get(0),
                )?;
                Ok(Some(count))
            })
            .await?;
        count.ok_or_else(|| Error::NotFound { key: id.into() })
    }
}

// ---------------------------
// Column and row plumbing
// ---------------------------

fn now_text() -> String {
    text_ts(Utc::now())
}

fn text_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_state(text: &str) -> rusqlite::Result<ProcessState> {
    ProcessState::parse(text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown process state '{text}'").into(),
        )
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessRecord> {
    let config_json: String = row.get(2)?;
    let config: ProcessConfig = serde_json::from_str(&config_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let state_text: String = row.get(3)?;
    let metrics: Option<MetricsSnapshot> = match row.get::<_, Option<String>>(10)? {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    let stop_kind = match row.get::<_, Option<String>>(11)? {
        Some(text) => Some(StopKind::parse(&text).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                11,
                Type::Text,
                format!("unknown stop kind '{text}'").into(),
            )
        })?),
        None => None,
    };

    Ok(ProcessRecord {
        id: row.get(0)?,
        config,
        state: parse_state(&state_text)?,
        pid: row.get::<_, Option<i64>>(4)?.map(|p| p as u32),
        started_at: row
            .get::<_, Option<String>>(5)?
            .map(|t| parse_ts(5, t))
            .transpose()?,
        stopped_at: row
            .get::<_, Option<String>>(6)?
            .map(|t| parse_ts(6, t))
            .transpose()?,
        restart_count: row.get(7)?,
        last_heartbeat: row
            .get::<_, Option<String>>(8)?
            .map(|t| parse_ts(8, t))
            .transpose()?,
        error_message: row.get(9)?,
        metrics,
        stop_kind,
        created_at: parse_ts(12, row.get(12)?)?,
        updated_at: parse_ts(13, row.get(13)?)?,
    })
}

/// Sets or replaces one column assignment.
fn assign(assignments: &mut Vec<(&'static str, Value)>, column: &'static str, value: Value) {
    if let Some(slot) = assignments.iter_mut().find(|(c, _)| *c == column) {
        slot.1 = value;
    } else {
        assignments.push((column, value));
    }
}

/// Expands a patch into column assignments, applying the lifecycle side
/// effects of a state change first so explicit patch fields win.
fn patch_assignments(patch: &RecordPatch) -> Vec<(&'static str, Value)> {
    let mut assignments: Vec<(&'static str, Value)> = Vec::new();

    if let Some(state) = patch.state {
        assign(
            &mut assignments,
            "state",
            Value::Text(state.as_str().to_string()),
        );
        match state {
            ProcessState::Starting => {
                assign(&mut assignments, "pid", Value::Null);
                assign(&mut assignments, "error_message", Value::Null);
                assign(&mut assignments, "stop_kind", Value::Null);
            }
            ProcessState::Running => {
                assign(&mut assignments, "started_at", Value::Text(now_text()));
                assign(&mut assignments, "stopped_at", Value::Null);
            }
            ProcessState::Stopped | ProcessState::Failed => {
                assign(&mut assignments, "stopped_at", Value::Text(now_text()));
                assign(&mut assignments, "pid", Value::Null);
            }
            ProcessState::Registered => {
                assign(&mut assignments, "pid", Value::Null);
            }
            ProcessState::Stopping => {}
        }
    }

    if let Some(pid) = patch.pid {
        let value = pid.map_or(Value::Null, |p| Value::Integer(i64::from(p)));
        assign(&mut assignments, "pid", value);
    }
    if let Some(count) = patch.restart_count {
        assign(
            &mut assignments,
            "restart_count",
            Value::Integer(i64::from(count)),
        );
    }
    if let Some(ref message) = patch.error_message {
        let value = message
            .as_ref()
            .map_or(Value::Null, |m| Value::Text(m.clone()));
        assign(&mut assignments, "error_message", value);
    }
    if let Some(heartbeat) = patch.last_heartbeat {
        let value = heartbeat.map_or(Value::Null, |t| Value::Text(text_ts(t)));
        assign(&mut assignments, "last_heartbeat", value);
    }
    if let Some(stop_kind) = patch.stop_kind {
        let value = stop_kind.map_or(Value::Null, |k| Value::Text(k.as_str().to_string()));
        assign(&mut assignments, "stop_kind", value);
    }

    assignments
}

/// Renders `UPDATE processes SET ... WHERE id = ?N`; the caller appends the
/// id (and any extra predicate) to the argument list.
fn render_update(assignments: &[(&'static str, Value)]) -> (String, Vec<Value>) {
    let mut fragments = Vec::with_capacity(assignments.len());
    let mut args = Vec::with_capacity(assignments.len() + 1);
    for (i, (column, value)) in assignments.iter().enumerate() {
        fragments.push(format!("{column} = ?{}", i + 1));
        args.push(value.clone());
    }
    let sql = format!(
        "UPDATE processes SET {} WHERE id = ?{}",
        fragments.join(", "),
        assignments.len() + 1
    );
    (sql, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn registry_with(name: &str) -> (Registry, String) {
        let registry = Registry::open_in_memory().await.unwrap();
        let id = registry
            .register(ProcessConfig::new(name, "sleep 100"))
            .await
            .unwrap();
        (registry, id)
    }

    #[tokio::test]
    async fn register_creates_registered_record() {
        let (registry, id) = registry_with("svc1").await;
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Registered);
        assert_eq!(record.config.name, "svc1");
        assert_eq!(record.restart_count, 0);
        assert!(record.pid.is_none());
        assert!(record.last_heartbeat.is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_original_unmodified() {
        let (registry, id) = registry_with("svc1").await;
        let before = registry.get(&id).await.unwrap();

        let err = registry
            .register(ProcessConfig::new("svc1", "echo other"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { ref name } if name == "svc1"));

        let after = registry.get(&id).await.unwrap();
        assert_eq!(after.config.command, before.config.command);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn lookup_by_name_and_find() {
        let (registry, id) = registry_with("svc1").await;
        assert_eq!(registry.get_by_name("svc1").await.unwrap().id, id);
        assert_eq!(registry.find("svc1").await.unwrap().id, id);
        assert_eq!(registry.find(&id).await.unwrap().id, id);
        assert!(matches!(
            registry.find("ghost").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_preserves_insertion_order_and_filters() {
        let registry = Registry::open_in_memory().await.unwrap();
        for name in ["alpha", "beta", "gamma"] {
            registry
                .register(ProcessConfig::new(name, "sleep 100"))
                .await
                .unwrap();
        }
        let all = registry.list(ListFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.config.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);

        let filtered = registry.list(ListFilter::by_name("am")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].config.name, "gamma");

        let registered = registry
            .list(ListFilter::by_state(ProcessState::Registered))
            .await
            .unwrap();
        assert_eq!(registered.len(), 3);
        let running = registry
            .list(ListFilter::by_state(ProcessState::Running))
            .await
            .unwrap();
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn update_applies_state_side_effects() {
        let (registry, id) = registry_with("svc1").await;
        registry
            .update(&id, RecordPatch::state(ProcessState::Running).with_pid(Some(4242)))
            .await
            .unwrap();
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Running);
        assert_eq!(record.pid, Some(4242));
        assert!(record.started_at.is_some());

        registry
            .update(&id, RecordPatch::state(ProcessState::Stopped))
            .await
            .unwrap();
        let record = registry.get(&id).await.unwrap();
        assert_eq!(record.state, ProcessState::Stopped);
        assert!(record.pid.is_none(), "terminal states clear the pid");
        assert!(record.stopped_at.is_some());
    }

    #[tokio::test]
    async fn update_bumps_updated_at() {
        let (registry, id) = registry_with("svc1").await;
        let before = registry.get(&id).await.unwrap().updated_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry
            .update(&id, RecordPatch::default().with_error("boom"))
            .await
            .unwrap();
        let after = registry.get(&id).await.unwrap();
        assert!(after.updated_at > before);
        assert_eq!(after.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn transition_is_a_compare_and_swap() {
        let (registry, id) = registry_with("svc1").await;
        let moved = registry
            .transition(&id, &[ProcessState::Registered], ProcessState::Starting)
            .await
            .unwrap();
        assert!(moved);

        // Second attempt from the old state loses.
        let moved = registry
            .transition(&id, &[ProcessState::Registered], ProcessState::Starting)
            .await
            .unwrap();
        assert!(!moved);
        assert_eq!(
            registry.get(&id).await.unwrap().state,
            ProcessState::Starting
        );

        assert!(matches!(
            registry
                .transition("ghost", &[ProcessState::Registered], ProcessState::Starting)
                .await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn starting_transition_clears_stop_metadata() {
        let (registry, id) = registry_with("svc1").await;
        registry
            .update(
                &id,
                RecordPatch::state(ProcessState::Stopped)
                    .with_stop_kind(Some(StopKind::ManualGraceful))
                    .with_error("old failure"),
            )
            .await
            .unwrap();
        registry
            .transition(&id, &[ProcessState::Stopped], ProcessState::Starting)
            .await
            .unwrap();
        let record = registry.get(&id).await.unwrap();
        assert!(record.stop_kind.is_none());
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn delete_rejects_running_family() {
        let (registry, id) = registry_with("svc1").await;
        registry
            .update(&id, RecordPatch::state(ProcessState::Running).with_pid(Some(1)))
            .await
            .unwrap();
        assert!(matches!(
            registry.delete(&id).await,
            Err(Error::InvalidState { op: "delete", .. })
        ));

        registry
            .update(&id, RecordPatch::state(ProcessState::Stopped))
            .await
            .unwrap();
        registry.delete(&id).await.unwrap();
        assert!(matches!(
            registry.get(&id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_touch_and_stale_listing() {
        let (registry, id) = registry_with("svc1").await;
        assert!(!registry.touch_heartbeat("ghost").await.unwrap());
        assert!(registry.touch_heartbeat(&id).await.unwrap());

        registry
            .update(&id, RecordPatch::state(ProcessState::Running).with_pid(Some(1)))
            .await
            .unwrap();
        let stale = registry
            .list_stale(Utc::now() - chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(stale.is_empty(), "fresh heartbeat is not stale");

        let stale = registry
            .list_stale(Utc::now() + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, id);
    }

    #[tokio::test]
    async fn restart_counter_increments() {
        let (registry, id) = registry_with("svc1").await;
        assert_eq!(registry.increment_restart_count(&id).await.unwrap(), 1);
        assert_eq!(registry.increment_restart_count(&id).await.unwrap(), 2);
        assert!(matches!(
            registry.increment_restart_count("ghost").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn metrics_snapshot_round_trips() {
        let (registry, id) = registry_with("svc1").await;
        let snapshot = MetricsSnapshot {
            cpu_percent: 12.5,
            memory_mb: 42.0,
            memory_percent: 1.5,
            virtual_memory_mb: 128.0,
            threads: 4,
            open_fds: 16,
            uptime_seconds: 60,
            sampled_at: Utc::now(),
        };
        registry.store_metrics(&id, &snapshot).await.unwrap();
        let record = registry.get(&id).await.unwrap();
        let stored = record.metrics.unwrap();
        assert_eq!(stored.threads, 4);
        assert_eq!(stored.open_fds, 16);
    }
}
