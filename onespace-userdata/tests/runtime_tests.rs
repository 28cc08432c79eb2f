use onespace_storage::StorageError;
use onespace_sync::{HttpRemote, ReplicationConfig, StaticIdentity, SyncState};
use onespace_userdata::{AppConfig, OneSpace, UserDataError, init_logging};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn in_memory() -> OneSpace {
    init_logging();
    OneSpace::open(AppConfig::default()).unwrap()
}

#[test]
fn config_loads_from_json_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("onespace.json");
    std::fs::write(
        &path,
        r#"{
            "store": {"path": "/tmp/onespace.duckdb"},
            "replication": {"remote_url": "https://couch.example.com/onespace", "batch_size": 25}
        }"#,
    )
    .unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.store.path.as_deref(), Some(std::path::Path::new("/tmp/onespace.duckdb")));
    assert_eq!(config.store.threads, 2);
    assert_eq!(config.replication.batch_size, 25);
    assert_eq!(config.replication.poll_interval_secs, 30);
    assert_eq!(config.settings_update_retries, 3);
}

#[test]
fn malformed_config_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(AppConfig::load(&path), Err(UserDataError::Config(_))));
    assert!(matches!(
        AppConfig::load(&dir.path().join("missing.json")),
        Err(UserDataError::Io(_))
    ));
}

#[tokio::test]
async fn data_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.store.path = Some(dir.path().join("data").join("onespace.duckdb"));

    let space = OneSpace::open(config.clone()).unwrap();
    let task = space
        .service()
        .create_task("alice", serde_json::json!({"title": "persist"}).as_object().unwrap())
        .unwrap();
    space.close().await;

    let space = OneSpace::open(config).unwrap();
    let tasks = space.service().get_user_tasks("alice").unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
    space.close().await;
}

#[tokio::test]
async fn no_remote_configured_means_offline_only() {
    let space = in_memory();
    let handle = space
        .start_sync_from_config(Arc::new(StaticIdentity::new("alice", "tok")), None)
        .await
        .unwrap();
    assert!(handle.is_none());
    space.service().get_user_settings("alice").unwrap();
    space.close().await;
}

#[tokio::test]
async fn missing_credential_degrades_to_local_only() {
    let space = in_memory();
    let remote = HttpRemote::new("http://127.0.0.1:9", &ReplicationConfig::default()).unwrap();
    let handle = space
        .start_sync(
            Arc::new(remote),
            Arc::new(StaticIdentity::signed_out("alice")),
            None,
        )
        .await
        .unwrap();
    assert!(handle.is_none());
    assert!(space.sync_handle().await.is_none());
    space.service().get_timer_state("alice").unwrap();
    space.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_remote_retries_while_local_writes_succeed() {
    let mut config = AppConfig::default();
    config.replication = ReplicationConfig {
        remote_url: Some("http://127.0.0.1:9".into()),
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        request_timeout_secs: 1,
        ..ReplicationConfig::default()
    };
    let space = OneSpace::open(config).unwrap();
    let handle = space
        .start_sync_from_config(Arc::new(StaticIdentity::new("alice", "tok")), None)
        .await
        .unwrap()
        .unwrap();

    let status = tokio::time::timeout(
        Duration::from_secs(10),
        handle.wait_for(|s| s.last_error.is_some()),
    )
    .await
    .unwrap();
    assert_eq!(status.state, SyncState::Paused);

    space.service().get_user_settings("alice").unwrap();
    space.close().await;
    assert_eq!(handle.state(), SyncState::Disconnected);
    assert!(space.sync_handle().await.is_none());
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let space = in_memory();
    space.service().get_user_settings("alice").unwrap();
    space.close().await;
    space.close().await;

    let err = space.service().get_user_settings("alice").unwrap_err();
    assert!(matches!(err, UserDataError::Storage(StorageError::Closed)));
}
