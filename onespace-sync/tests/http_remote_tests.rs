use onespace_sync::{Credentials, HttpRemote, RemoteReplica, ReplicationConfig, SyncError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn creds() -> Credentials {
    Credentials {
        token: "tok".into(),
        username: "alice".into(),
        expires_at: None,
    }
}

fn setup(server: &MockServer) -> HttpRemote {
    let config = ReplicationConfig::with_remote(server.uri());
    HttpRemote::from_config(&config).unwrap().unwrap()
}

// --- Changes ---

#[tokio::test]
async fn changes_sends_scope_and_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_changes"))
        .and(header("authorization", "Bearer tok"))
        .and(query_param("since", "7"))
        .and(query_param("limit", "50"))
        .and(query_param("include_docs", "true"))
        .and(query_param("username", "alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"seq": 8, "id": "alice::settings", "changes": [{"rev": "2-a"}],
                 "doc": {"_id": "alice::settings", "_rev": "2-a", "type": "settings", "username": "alice"}}
            ],
            "last_seq": 8
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = setup(&server);
    let page = remote.changes(&creds(), "7", 50).await.unwrap();
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].id, "alice::settings");
    assert_eq!(page.last_seq_token(), "8");
}

#[tokio::test]
async fn unauthorized_and_forbidden_are_denied() {
    for status in [401, 403] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_changes"))
            .respond_with(ResponseTemplate::new(status).set_body_string("token expired"))
            .mount(&server)
            .await;

        let err = setup(&server).changes(&creds(), "0", 10).await.unwrap_err();
        assert!(err.is_denied(), "status {status} gave {err:?}");
        assert!(!err.is_transient());
    }
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_changes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = setup(&server).changes(&creds(), "0", 10).await.unwrap_err();
    assert!(matches!(err, SyncError::Transient(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_changes_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_changes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = setup(&server).changes(&creds(), "0", 10).await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)));
}

#[tokio::test]
async fn unreachable_remote_is_transient() {
    let server = MockServer::start().await;
    let remote = setup(&server);
    drop(server);

    let err = remote.changes(&creds(), "0", 10).await.unwrap_err();
    assert!(matches!(err, SyncError::Http(_)));
    assert!(err.is_transient());
}

// --- Bulk docs ---

#[tokio::test]
async fn bulk_docs_posts_without_new_edits() {
    let server = MockServer::start().await;
    let docs = vec![
        json!({"_id": "alice::settings", "_rev": "1-a", "type": "settings", "username": "alice"}),
        json!({"_id": "alice::task::1::x", "_rev": "2-b", "_deleted": true, "username": "alice"}),
    ];
    Mock::given(method("POST"))
        .and(path("/_bulk_docs"))
        .and(header("authorization", "Bearer tok"))
        .and(query_param("username", "alice"))
        .and(body_json(json!({"docs": docs, "new_edits": false})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    setup(&server).bulk_docs(&creds(), docs).await.unwrap();
}

#[tokio::test]
async fn bulk_docs_forbidden_is_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk_docs"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = setup(&server).bulk_docs(&creds(), vec![]).await.unwrap_err();
    assert!(matches!(err, SyncError::Denied(_)));
}

// --- Config ---

#[test]
fn endpoint_trims_trailing_slash_and_unset_url_is_offline() {
    let config = ReplicationConfig::with_remote("https://couch.example.com/db/");
    let remote = HttpRemote::from_config(&config).unwrap().unwrap();
    assert_eq!(remote.endpoint(), "https://couch.example.com/db");

    assert!(HttpRemote::from_config(&ReplicationConfig::default()).unwrap().is_none());
}
