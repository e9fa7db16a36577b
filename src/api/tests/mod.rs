use super::*;
use crate::chain::ChainParts;
use crate::chain::test_helpers::{MemoryResolver, RecordingProcessor, test_config};
use crate::db::Database;
use crate::telemetry::TelemetryBuffer;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;


/// Processor whose continuations go through its own queue
async fn create_test_processor(
    customize: impl FnOnce(&mut Config),
) -> (ChainProcessor, Arc<Config>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    customize(&mut config);
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let processor = ChainProcessor::with_parts(
        config.clone(),
        db,
        ChainParts {
            resolver: Some(Arc::new(MemoryResolver::missing(&["missing"]))),
            processor: Some(Arc::new(RecordingProcessor::default())),
            telemetry: Some(Arc::new(TelemetryBuffer::noop())),
            ..Default::default()
        },
    )
    .unwrap();
    (processor, Arc::new(config), temp_dir)
}

async fn test_app() -> (Router, ChainProcessor, tempfile::TempDir) {
    let (processor, config, temp_dir) = create_test_processor(|_| {}).await;
    (create_router(processor.clone(), config), processor, temp_dir)
}

/// Send a request and decode the JSON reply (`Value::Null` for an empty body)
async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

fn task_body(item_ids: &[&str]) -> Value {
    let items: Vec<Value> = item_ids
        .iter()
        .map(|id| json!({ "item_id": id, "data_key": format!("exports/{}", id) }))
        .collect();
    json!({
        "type": "export_blocks",
        "items": items,
        "identity": { "id": "user-1", "display_name": "Ada", "kind": "user" },
    })
}

#[tokio::test]
async fn test_api_server_serves_until_shutdown() {
    let (processor, config, _temp_dir) = create_test_processor(|config| {
        config.server.bind_address = "127.0.0.1:0".parse().unwrap();
    })
    .await;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(start_api_server_with_shutdown(processor, config, async {
        stop_rx.await.ok();
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_routes_require_api_key_when_configured() {
    let (processor, config, _temp_dir) = create_test_processor(|config| {
        config.server.api_key = Some("k3y".to_string());
    })
    .await;
    let app = create_router(processor, config);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let request = Request::builder()
        .uri("/health")
        .header("X-Api-Key", "k3y")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
