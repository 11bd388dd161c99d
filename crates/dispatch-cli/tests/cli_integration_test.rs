//! CLI Integration Tests
//!
//! Runs the `dispatch` binary against cluster configs written to temp files.
//! Search nodes are either in-process axum servers or ports nothing listens on.
//! All addresses are `127.0.0.1`.

use std::io::Write;
use std::process::{Command, Output};

use axum::{routing::post, Json, Router};
use dispatch_common::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn dispatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dispatch"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

async fn dispatch_async(args: Vec<String>) -> Output {
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        dispatch(&args)
    })
    .await
    .unwrap()
}

fn write_config(nodes: Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let config = json!({
        "nodes": nodes,
        "ping_interval_ms": 100,
        "ping_timeout_ms": 300
    });
    write!(file, "{config}").unwrap();
    file
}

async fn handle(Json(req): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let result = match req.method.as_str() {
        "search.ping" => json!({"active_docs": 10}),
        "search.query" => json!({
            "hits": [{"id": "doc-1", "relevance": 0.8}, {"id": "doc-2", "relevance": 0.3}],
            "total_hit_count": 2,
            "coverage": {"docs": 10, "active": 10}
        }),
        "search.docsum" => {
            let ids: Vec<String> = serde_json::from_value(req.params["ids"].clone()).unwrap_or_default();
            let docsums: Vec<Value> = ids
                .into_iter()
                .map(|id| json!({"id": id, "fields": {"title": format!("title of {id}")}}))
                .collect();
            json!({ "docsums": docsums })
        }
        _ => return Json(JsonRpcResponse::error(req.id, JsonRpcError::method_not_found())),
    };
    Json(JsonRpcResponse::success(req.id, result))
}

async fn start_node() -> u16 {
    let app = Router::new().route("/", post(handle));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    port
}

async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_requires_subcommand() {
    let output = dispatch(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_config_file() {
    let output = dispatch(&["status", "-c", "/nonexistent/cluster.json"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load cluster config"), "{stderr}");
}

#[test]
fn test_invalid_config_rejected() {
    let config = write_config(json!([]));
    let output = dispatch(&["status", "-c", config.path().to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No search nodes configured"), "{stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_reports_failed_node() {
    let live = start_node().await;
    let dead = dead_port().await;
    let config = write_config(json!([
        {"key": 0, "host": "127.0.0.1", "port": live, "group": 0},
        {"key": 1, "host": "127.0.0.1", "port": dead, "group": 1}
    ]));

    let output = dispatch_async(vec![
        "status".into(),
        "-c".into(),
        config.path().to_str().unwrap().into(),
    ])
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["total_groups"], 2);
    assert_eq!(status["groups_with_sufficient_coverage"], 1);
    assert_eq!(status["groups"][0]["nodes"][0]["state"], "working");
    assert_eq!(status["groups"][1]["nodes"][0]["state"], "failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_prints_filled_result() {
    let port = start_node().await;
    let config = write_config(json!([
        {"key": 0, "host": "127.0.0.1", "port": port, "group": 0}
    ]));

    let output = dispatch_async(vec![
        "query".into(),
        "-c".into(),
        config.path().to_str().unwrap().into(),
        "-q".into(),
        r#"{"match": "anything"}"#.into(),
        "--hits".into(),
        "1".into(),
        "--trace-level".into(),
        "2".into(),
    ])
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let outcome: Value = serde_json::from_slice(&output.stdout).unwrap();
    let hits = outcome["result"]["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "doc-1");
    assert_eq!(hits[0]["fields"]["title"], "title of doc-1");
    assert_eq!(outcome["result"]["total_hit_count"], 2);
    assert_eq!(outcome["search_path"], "/0");
    assert_eq!(outcome["trace"][0], "Dispatching to group 0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_search_path_fails() {
    let port = start_node().await;
    let config = write_config(json!([
        {"key": 0, "host": "127.0.0.1", "port": port, "group": 0}
    ]));

    let output = dispatch_async(vec![
        "query".into(),
        "-c".into(),
        config.path().to_str().unwrap().into(),
        "--search-path".into(),
        "[0,x>/0".into(),
    ])
    .await;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid search path"), "{stderr}");
}
