//! HTTP API tests against in-process backends.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use serde_json::{json, Value};
use tower::ServiceExt;

use docroute::app::App;
use docroute::config::Config;
use docroute::server::router;
use docroute_core::provider::{AgentAction, ToolCall};
use docroute_core::store::memory::InMemoryVectorStore;
use docroute_core::testing::ScriptedProvider;

const RUST_TEXT: &str = "Rust is a systems language. Cargo builds crates and runs tests.";

fn app_with(provider: ScriptedProvider) -> App {
    App::with_components(
        Config::default(),
        Arc::new(provider),
        Arc::new(InMemoryVectorStore::new()),
        None,
    )
}

fn app() -> App {
    app_with(ScriptedProvider::new())
}

fn files_body(files: &[(&str, &str)]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|(name, text)| {
            json!({
                "name": name,
                "content_base64": base64::engine::general_purpose::STANDARD.encode(text),
            })
        })
        .collect();
    json!({ "files": files })
}

async fn send(app: &App, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router(app.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn upload(app: &App, collection: &str, files: &[(&str, &str)]) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/collections/{}/files", collection),
        Some(files_body(files)),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_upload_then_list() {
    let app = app();
    let (status, body) = upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "docs");
    assert_eq!(body["version"], 1);

    let (_, body) = upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;
    assert_eq!(body["version"], 2);

    let (status, body) = send(&app, "GET", "/collections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"].as_array().unwrap().len(), 1);
    assert_eq!(body["collections"][0]["name"], "docs");
}

#[tokio::test]
async fn test_upload_errors() {
    let app = app();
    let (status, body) = upload(&app, "docs", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let bad = json!({ "files": [{ "name": "a.txt", "content_base64": "%%%" }] });
    let (status, body) = send(&app, "POST", "/collections/docs/files", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("invalid base64"));

    let (status, _) = upload(&app, "docs", &[("blob.bin", "abc")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_vector_and_summary() {
    let app = app();
    upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;

    let (status, body) = send(
        &app,
        "POST",
        "/query",
        Some(json!({ "collection": "docs", "query": "what builds crates?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["text"].as_str().unwrap().starts_with("answer("));
    assert_eq!(body["sources"][0]["chunk"]["document_id"], "rust.txt");

    let (status, body) = send(
        &app,
        "POST",
        "/query",
        Some(json!({ "collection": "docs", "query": "overview", "engine": "summary" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["text"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_error_contract() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/query",
        Some(json!({ "collection": "missing", "query": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_collection");
    assert_eq!(
        body["error"]["message"],
        "query failed: unknown collection 'missing'"
    );

    let (status, body) = send(&app, "POST", "/query", Some(json!({ "collection": "docs", "query": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "query must not be empty");
}

#[tokio::test]
async fn test_route_picks_summary_tool() {
    let app = app();
    upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;

    let (status, body) = send(
        &app,
        "POST",
        "/route",
        Some(json!({ "collection": "docs", "query": "summarize this document" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tool"], "summarize_docs");
    assert_eq!(body["fell_back"], false);
    assert_eq!(body["transitions"][0], "received");
}

#[tokio::test]
async fn test_route_falls_back_to_vector() {
    let app = app_with(ScriptedProvider::new().with_labels(["no_such_tool"]));
    upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;

    let (status, body) = send(
        &app,
        "POST",
        "/route",
        Some(json!({ "collection": "docs", "query": "cargo" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tool"], "search_docs");
    assert_eq!(body["fell_back"], true);
}

#[tokio::test]
async fn test_chat_session_ingests_attachment() {
    let provider = ScriptedProvider::new().with_actions([
        AgentAction::CallTool(ToolCall {
            id: "call_0".into(),
            name: "ingest_files".into(),
            arguments: json!({ "collection": "notes" }),
        }),
        AgentAction::Reply("Your notes are ready.".into()),
    ]);
    let app = app_with(provider);

    let (status, body) = send(&app, "POST", "/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/files", id),
        Some(files_body(&[("rust.md", RUST_TEXT)])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attached"][0], "rust.md");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", id),
        Some(json!({ "message": "please load my notes" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Your notes are ready.");
    assert_eq!(body["tool_calls"], 1);
    assert_eq!(app.catalog.get("notes").await.unwrap().version, 1);

    let (_, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", id),
        Some(json!({ "message": "bye" })),
    )
    .await;
    assert_eq!(body["finished"], true);

    let (status, _) = send(&app, "DELETE", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_chat_tool_limit_and_unknown_session() {
    let provider = ScriptedProvider::new().with_tool_loop("list_collections", json!({}), 6);
    let app = app_with(provider);
    let (_, body) = send(&app, "POST", "/sessions", None).await;
    let id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", id),
        Some(json!({ "message": "list everything" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "tool_limit_exceeded");

    let (status, _) = send(
        &app,
        "POST",
        "/sessions/nope/chat",
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dropped_chat_request_cancels_turn() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_embed_delay(Duration::from_millis(40))
            .with_actions([
                AgentAction::CallTool(ToolCall {
                    id: "call_0".into(),
                    name: "search_docs".into(),
                    arguments: json!({ "query": "cargo" }),
                }),
                AgentAction::Reply("resumed".into()),
            ]),
    );
    let app = App::with_components(
        Config::default(),
        provider.clone(),
        Arc::new(InMemoryVectorStore::new()),
        None,
    );
    upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;
    let (_, body) = send(&app, "POST", "/sessions", None).await;
    let id = body["session_id"].as_str().unwrap().to_string();
    let uri = format!("/sessions/{}/chat", id);

    let dropped = tokio::time::timeout(
        Duration::from_millis(10),
        send(&app, "POST", &uri, Some(json!({ "message": "search cargo" }))),
    )
    .await;
    assert!(dropped.is_err());

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "message": "are you there?" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "resumed");
    assert_eq!(provider.chat_calls(), 2);
}

#[tokio::test]
async fn test_remove_collection() {
    let app = app();
    upload(&app, "docs", &[("rust.txt", RUST_TEXT)]).await;

    let (status, _) = send(&app, "DELETE", "/collections/docs", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", "/collections/docs", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/collections", None).await;
    assert!(body["collections"].as_array().unwrap().is_empty());
}
