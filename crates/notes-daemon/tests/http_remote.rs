//! Tests for the HTTP remote and token refresh against a mock server.

use std::sync::Arc;

use httpmock::prelude::*;
use notes_core::credentials::{CredentialError, CredentialProvider};
use notes_core::fs::InMemoryFs;
use notes_core::remote::{RemoteError, RemoteStore};
use notes_core::settings::{get_typed, keys, InMemorySettings, SettingsStore};
use notes_core::sync::{SyncConfig, SyncEngine, SyncOutcome};
use notes_core::vault::LocalVault;
use notes_daemon::auth::RefreshTokenCredentials;
use notes_daemon::http_remote::HttpRemote;
use serde_json::json;

fn remote(server: &MockServer) -> HttpRemote {
    HttpRemote::new(&server.base_url(), &server.base_url()).unwrap()
}

#[tokio::test]
async fn test_list_folder_follows_cursor_and_keeps_files() {
    let server = MockServer::start_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/list_folder")
                .header("authorization", "Bearer t1")
                .json_body(json!({ "path": "/Notes", "recursive": false }));
            then.status(200).json_body(json!({
                "entries": [
                    {
                        ".tag": "file",
                        "name": "a.md",
                        "path_display": "/Notes/a.md",
                        "server_modified": "2024-05-01T10:00:00Z"
                    },
                    { ".tag": "folder", "name": "archive", "path_display": "/Notes/archive" }
                ],
                "cursor": "c1",
                "has_more": true
            }));
        })
        .await;
    let rest = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/list_folder/continue")
                .json_body(json!({ "cursor": "c1" }));
            then.status(200).json_body(json!({
                "entries": [{
                    ".tag": "file",
                    "name": "b.md",
                    "path_display": "/Notes/b.md",
                    "server_modified": "2024-05-02T10:00:00Z"
                }],
                "cursor": "c2",
                "has_more": false
            }));
        })
        .await;

    let entries = remote(&server).list_folder("t1", "/Notes").await.unwrap();

    first.assert_async().await;
    rest.assert_async().await;
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.md", "b.md"]);
    assert_eq!(entries[1].path, "/Notes/b.md");
    assert_eq!(entries[0].modified.to_rfc3339(), "2024-05-01T10:00:00+00:00");
}

#[tokio::test]
async fn test_error_statuses_map_to_remote_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/create_folder_v2");
            then.status(409)
                .body(r#"{"error_summary": "path/conflict/folder/..", "error": {".tag": "path"}}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/delete_v2");
            then.status(409)
                .body(r#"{"error_summary": "path_lookup/not_found/..", "error": {".tag": "path_lookup"}}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/list_folder");
            then.status(401).body(r#"{"error_summary": "expired_access_token/"}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/download");
            then.status(500).body("boom");
        })
        .await;

    let remote = remote(&server);
    assert!(matches!(
        remote.create_folder("t", "/Notes").await,
        Err(RemoteError::AlreadyExists(_))
    ));
    assert!(matches!(
        remote.delete("t", "/Notes/gone.md").await,
        Err(RemoteError::NotFound(_))
    ));
    assert!(matches!(
        remote.list_folder("t", "/Notes").await,
        Err(RemoteError::Unauthorized)
    ));
    assert!(matches!(
        remote.download("t", "/Notes/a.md").await,
        Err(RemoteError::Http { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_upload_sends_bytes_and_returns_metadata() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/upload")
                .header("authorization", "Bearer t1")
                .header("content-type", "application/octet-stream")
                .header_exists("dropbox-api-arg")
                .body("---\nid: a\n---\n\nhello");
            then.status(200).json_body(json!({
                "name": "a.md",
                "path_display": "/Notes/a.md",
                "server_modified": "2024-05-03T08:00:00Z"
            }));
        })
        .await;
    let download = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/download")
                .header_exists("dropbox-api-arg");
            then.status(200).body("remote bytes");
        })
        .await;

    let remote = remote(&server);
    let entry = remote
        .upload("t1", "/Notes/a.md", b"---\nid: a\n---\n\nhello", true)
        .await
        .unwrap();
    let bytes = remote.download("t1", "/Notes/a.md").await.unwrap();

    upload.assert_async().await;
    download.assert_async().await;
    assert_eq!(entry.name, "a.md");
    assert_eq!(entry.path, "/Notes/a.md");
    assert_eq!(bytes, b"remote bytes");
}

#[tokio::test]
async fn test_refresh_exchanges_token_and_stores_it() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth2/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=r1")
                .body_contains("client_id=app");
            then.status(200)
                .json_body(json!({ "access_token": "fresh", "token_type": "bearer", "expires_in": 14400 }));
        })
        .await;

    let settings = Arc::new(InMemorySettings::new());
    let credentials = RefreshTokenCredentials::new(
        &server.base_url(),
        "app",
        "r1",
        None,
        Arc::clone(&settings) as Arc<dyn SettingsStore>,
    );

    // No access token yet, so the first bearer refreshes
    assert_eq!(credentials.bearer().await.unwrap(), "fresh");
    assert_eq!(credentials.bearer().await.unwrap(), "fresh");

    token.assert_hits_async(1).await;
    let stored: Option<String> = get_typed(settings.as_ref(), keys::ACCESS_TOKEN).await.unwrap();
    assert_eq!(stored.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_refresh_rejected_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(400).json_body(json!({ "error": "invalid_grant" }));
        })
        .await;

    let credentials = RefreshTokenCredentials::new(
        &server.base_url(),
        "app",
        "revoked",
        Some("stale".into()),
        Arc::new(InMemorySettings::new()),
    );

    assert_eq!(credentials.bearer().await.unwrap(), "stale");
    assert!(matches!(
        credentials.refresh().await,
        Err(CredentialError::RefreshFailed(_))
    ));
}

#[tokio::test]
async fn test_sync_pass_refreshes_rejected_token_once() {
    let server = MockServer::start_async().await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/create_folder_v2")
                .header("authorization", "Bearer stale");
            then.status(401).body(r#"{"error_summary": "expired_access_token/"}"#);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(200).json_body(json!({ "access_token": "fresh" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/create_folder_v2")
                .header("authorization", "Bearer fresh");
            then.status(409).body(r#"{"error_summary": "path/conflict/folder/."}"#);
        })
        .await;
    let listed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/files/list_folder")
                .header("authorization", "Bearer fresh");
            then.status(200)
                .json_body(json!({ "entries": [], "cursor": "c", "has_more": false }));
        })
        .await;

    let settings: Arc<dyn SettingsStore> = Arc::new(InMemorySettings::new());
    let credentials = RefreshTokenCredentials::new(
        &server.base_url(),
        "app",
        "r1",
        Some("stale".into()),
        Arc::clone(&settings),
    );
    let engine = SyncEngine::new(remote(&server), credentials, settings, SyncConfig::default());

    let mut vault = LocalVault::new(Arc::new(InMemoryFs::new()));
    vault.initialize().await.unwrap();
    let vault = vault.into_shared();

    let outcome = engine.sync(&vault).await;

    assert!(matches!(outcome, SyncOutcome::Completed(ref report) if report.errors.is_empty()));
    rejected.assert_hits_async(1).await;
    listed.assert_hits_async(1).await;
    assert!(vault.lock().await.index().last_sync.is_some());
}
