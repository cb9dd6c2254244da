//! In-process HTTP endpoint tests driving the `axum::Router` directly via
//! `axum_test::TestServer`, instead of the teacher's pattern of running a
//! live server against a hardcoded `BASE_URL` — grounded on
//! `examples/Lowband21-ferrex`'s `TestServer::builder()...build(...)` usage.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::json;

use remote_server::state::AppState;
use vfs_core::providers::local_disk::LocalDiskProvider;
use vfs_core::FileSystemProvider;

fn test_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn FileSystemProvider> = Arc::new(LocalDiskProvider::new(dir.path()));
    let state = AppState::new(provider, "disk", Duration::from_secs(1));
    let router = remote_server::build_router(state);
    (TestServer::new(router).unwrap(), dir)
}

#[tokio::test]
async fn capabilities_reports_disk_provider_bits() {
    let (server, _dir) = test_server();
    let response = server.get("/capabilities").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["bits"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn write_then_read_whole_file_round_trips() {
    let (server, _dir) = test_server();
    let put_response = server.put("/file/hello.txt?create=true&overwrite=true").bytes("hi there".into()).await;
    put_response.assert_status_ok();

    let get_response = server.get("/file/hello.txt").await;
    get_response.assert_status_ok();
    assert_eq!(get_response.text(), "hi there");
}

#[tokio::test]
async fn stat_on_missing_file_is_not_found() {
    let (server, _dir) = test_server();
    let response = server.post("/stat").json(&json!({ "path": "/nope.txt" })).await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn mkdir_then_readdir_lists_entry() {
    let (server, _dir) = test_server();
    server.post("/mkdir").json(&json!({ "path": "/sub" })).await.assert_status_ok();
    server.put("/file/sub/child.txt?create=true&overwrite=true").bytes("x".into()).await.assert_status_ok();

    let response = server.get("/readdir/sub").await;
    response.assert_status_ok();
    let entries: Vec<serde_json::Value> = response.json();
    assert!(entries.iter().any(|e| e["name"] == "child.txt"));
}

#[tokio::test]
async fn delete_then_stat_reports_not_found() {
    let (server, _dir) = test_server();
    server.put("/file/gone.txt?create=true&overwrite=true").bytes("x".into()).await.assert_status_ok();
    server.post("/delete").json(&json!({ "path": "/gone.txt", "recursive": false, "use_trash": false })).await.assert_status_ok();

    let response = server.post("/stat").json(&json!({ "path": "/gone.txt" })).await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn rename_moves_file_to_new_path() {
    let (server, _dir) = test_server();
    server.put("/file/a.txt?create=true&overwrite=true").bytes("content".into()).await.assert_status_ok();
    server.post("/rename").json(&json!({ "src": "/a.txt", "dst": "/b.txt", "overwrite": false })).await.assert_status_ok();

    server.post("/stat").json(&json!({ "path": "/a.txt" })).await.assert_status_not_found();
    server.post("/stat").json(&json!({ "path": "/b.txt" })).await.assert_status_ok();
}

#[tokio::test]
async fn open_write_read_close_round_trips_through_handle() {
    let (server, _dir) = test_server();
    let open_response = server.post("/open").json(&json!({ "path": "/handle.bin", "create": true, "overwrite": true })).await;
    open_response.assert_status_ok();
    let fd = open_response.json::<serde_json::Value>()["fd"].as_u64().unwrap();

    let content = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"payload");
    server
        .post("/write")
        .json(&json!({ "fd": fd, "pos": 0, "content": content, "offset": 0, "length": 7 }))
        .await
        .assert_status_ok();

    let read_response = server.post("/read").json(&json!({ "fd": fd, "pos": 0, "length": 7 })).await;
    read_response.assert_status_ok();
    let body: serde_json::Value = read_response.json();
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body["bytes"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, b"payload");

    server.post("/close").json(&json!({ "fd": fd })).await.assert_status_ok();
}
