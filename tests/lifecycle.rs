//! End-to-end lifecycle tests driving the full manager: real `/bin/sh`
//! children, the background monitor loop, and the heartbeat channel.

#![cfg(unix)]

use std::time::Duration;

use procvisor::{
    BackoffPolicy, HeartbeatClient, ListFilter, Manager, ManagerConfig, ProcessConfig,
    ProcessRecord, ProcessState, RestartPolicy, StopKind,
};

fn test_config(data_dir: &std::path::Path) -> ManagerConfig {
    let mut cfg = ManagerConfig::with_data_dir(data_dir);
    cfg.poll_interval = Duration::from_millis(25);
    cfg.health_timeout = Duration::from_millis(500);
    cfg.stop_timeout = Duration::from_millis(500);
    cfg.allowed_drift = Duration::from_millis(100);
    cfg.min_uptime = Duration::from_secs(3600);
    cfg.restart_pause = Duration::ZERO;
    cfg.backoff = BackoffPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(40),
        factor: 2.0,
    };
    cfg
}

async fn manager() -> (Manager, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(dir.path())).await.unwrap();
    (manager, dir)
}

async fn wait_until<F>(manager: &Manager, key: &str, timeout: Duration, predicate: F) -> ProcessRecord
where
    F: Fn(&ProcessRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let record = manager.status(key).await.unwrap();
        if predicate(&record) {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on '{key}'; state={} restart_count={} error={:?}",
            record.state,
            record.restart_count,
            record.error_message
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn register_start_stop_scenario() {
    let (manager, _dir) = manager().await;
    let id = manager
        .register(ProcessConfig::new("svc1", "sleep 100"))
        .await
        .unwrap();
    assert_eq!(
        manager.status(&id).await.unwrap().state,
        ProcessState::Registered
    );

    manager.start(&id).await.unwrap();
    let record = manager.status(&id).await.unwrap();
    assert_eq!(record.state, ProcessState::Running);
    assert!(record.pid.is_some());

    let outcome = manager.stop(&id).await.unwrap();
    assert!(!outcome.forced);
    let record = manager.status(&id).await.unwrap();
    assert_eq!(record.state, ProcessState::Stopped);
    assert!(record.pid.is_none());
}

#[tokio::test]
async fn status_resolves_ids_and_names() {
    let (manager, _dir) = manager().await;
    let id = manager
        .register(ProcessConfig::new("svc1", "sleep 100"))
        .await
        .unwrap();
    assert_eq!(manager.status("svc1").await.unwrap().id, id);
    assert_eq!(manager.status(&id).await.unwrap().config.name, "svc1");
    assert!(manager.status("ghost").await.is_err());
}

#[tokio::test]
async fn on_failure_crash_triggers_exactly_one_restart_attempt() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("crasher", "exit 1")
                .with_restart_policy(RestartPolicy::OnFailure)
                .with_max_retries(1),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();

    let record = wait_until(&manager, &id, Duration::from_secs(5), |r| {
        r.state == ProcessState::Failed
    })
    .await;
    assert_eq!(record.restart_count, 1, "exactly one automatic restart");
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .contains("restart limit"));
}

#[tokio::test]
async fn clean_exit_under_on_failure_is_not_restarted() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("oneshot", "exit 0")
                .with_restart_policy(RestartPolicy::OnFailure),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();

    let record = wait_until(&manager, &id, Duration::from_secs(5), |r| {
        r.state == ProcessState::Stopped
    })
    .await;
    assert_eq!(record.restart_count, 0);

    // Give the monitor a few more passes: nothing must resurrect it.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        manager.status(&id).await.unwrap().state,
        ProcessState::Stopped
    );
}

#[tokio::test]
async fn always_policy_exhausts_retries_without_a_fourth_spawn() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("crasher", "exit 1")
                .with_restart_policy(RestartPolicy::Always)
                .with_max_retries(2),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();

    let record = wait_until(&manager, &id, Duration::from_secs(5), |r| {
        r.state == ProcessState::Failed
    })
    .await;
    assert_eq!(record.restart_count, 2);

    // Counter freezes once terminal; no further attempts happen.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = manager.status(&id).await.unwrap();
    assert_eq!(record.state, ProcessState::Failed);
    assert_eq!(record.restart_count, 2);
}

#[tokio::test]
async fn manual_stop_under_unless_stopped_is_final() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("svc1", "sleep 100")
                .with_restart_policy(RestartPolicy::UnlessStopped),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();
    manager.stop(&id).await.unwrap();

    // The monitor keeps polling; a manual stop must never auto-restart.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = manager.status(&id).await.unwrap();
    assert_eq!(record.state, ProcessState::Stopped);
    assert_eq!(record.stop_kind, Some(StopKind::ManualGraceful));
    assert_eq!(record.restart_count, 0);
}

#[tokio::test]
async fn forced_manual_stop_under_always_is_not_restarted() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("stubborn", "trap '' TERM; sleep 100 & wait")
                .with_restart_policy(RestartPolicy::Always),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();
    // Give the shell a beat to install the trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = manager.stop(&id).await.unwrap();
    assert!(outcome.forced, "the TERM trap forces the kill path");

    // The kill escalation is still a manual stop: even `always` leaves it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = manager.status(&id).await.unwrap();
    assert_eq!(record.state, ProcessState::Stopped);
    assert_eq!(record.stop_kind, Some(StopKind::ManualForced));
    assert_eq!(record.restart_count, 0);
}

#[tokio::test]
async fn crash_under_unless_stopped_is_recovered() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            // Dies quickly the first time, then the restarted instance
            // stays up thanks to the marker file.
            ProcessConfig::new(
                "flappy",
                "if [ -e marker ]; then sleep 100; else touch marker; exit 1; fi",
            )
            .with_workdir(_dir.path().to_path_buf())
            .with_restart_policy(RestartPolicy::UnlessStopped)
            .with_max_retries(5),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();

    let record = wait_until(&manager, &id, Duration::from_secs(5), |r| {
        r.state == ProcessState::Running && r.restart_count == 1
    })
    .await;
    assert!(record.pid.is_some());
    manager.stop(&id).await.unwrap();
}

#[tokio::test]
async fn dependency_starts_before_the_dependent() {
    let (manager, _dir) = manager().await;
    manager
        .register(ProcessConfig::new("db", "sleep 100"))
        .await
        .unwrap();
    manager
        .register(
            ProcessConfig::new("api", "sleep 100").with_dependencies(vec!["db".to_string()]),
        )
        .await
        .unwrap();

    manager.start("api").await.unwrap();
    assert_eq!(manager.status("db").await.unwrap().state, ProcessState::Running);
    assert_eq!(manager.status("api").await.unwrap().state, ProcessState::Running);

    manager.stop("api").await.unwrap();
    manager.stop("db").await.unwrap();
}

#[tokio::test]
async fn heartbeat_staleness_fails_a_live_process() {
    let (manager, dir) = manager().await;
    manager.start_services().await.unwrap();

    let id = manager
        .register(
            ProcessConfig::new("quiet", "sleep 100").with_restart_policy(RestartPolicy::Never),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();

    // One ping through the real channel, then silence past the drift.
    let client = HeartbeatClient::new(
        id.clone(),
        dir.path().join("heartbeat.sock"),
        Duration::from_secs(10),
    );
    client.send_once().await.unwrap();
    assert!(manager.status(&id).await.unwrap().last_heartbeat.is_some());

    let record = wait_until(&manager, &id, Duration::from_secs(5), |r| {
        r.state == ProcessState::Failed
    })
    .await;
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .contains("heartbeat stale"));
}

#[tokio::test]
async fn batch_registration_registers_every_document() {
    let (manager, dir) = manager().await;
    let path = dir.path().join("fleet.json");
    std::fs::write(
        &path,
        r#"[
            { "name": "db", "command": "sleep 100" },
            { "name": "api", "command": "sleep 100", "dependencies": ["db"] }
        ]"#,
    )
    .unwrap();

    let ids = manager.register_batch(&path).await.unwrap();
    assert_eq!(ids.len(), 2);
    let names: Vec<String> = manager
        .list(ListFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.config.name)
        .collect();
    assert_eq!(names, vec!["db".to_string(), "api".to_string()]);

    // Same file again: first duplicate aborts the batch.
    assert!(manager.register_batch(&path).await.is_err());
}

#[tokio::test]
async fn captured_output_is_tailed_by_logs() {
    let (manager, _dir) = manager().await;
    let id = manager
        .register(
            ProcessConfig::new("chatty", "echo out-line; echo err-line 1>&2")
                .with_restart_policy(RestartPolicy::Never),
        )
        .await
        .unwrap();
    manager.start(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let tail = manager.logs(&id, 10).await.unwrap();
    assert!(tail.stdout.iter().any(|l| l.contains("out-line")));
    assert!(tail.stderr.iter().any(|l| l.contains("err-line")));
}

#[tokio::test]
async fn shutdown_stops_every_running_process() {
    let (manager, _dir) = manager().await;
    manager.start_services().await.unwrap();
    for name in ["a", "b"] {
        manager
            .register(ProcessConfig::new(name, "sleep 100"))
            .await
            .unwrap();
        manager.start(name).await.unwrap();
    }

    manager.shutdown().await.unwrap();
    for name in ["a", "b"] {
        assert_eq!(
            manager.status(name).await.unwrap().state,
            ProcessState::Stopped
        );
    }
}
