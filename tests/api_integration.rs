//! API Integration Tests for netdrift
//!
//! Covers every read endpoint of the HTTP API.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use netdrift::server::{AppState, create_router};
use netdrift::{IN_MEMORY_PATH, Record, StorageBuilder, StorageHandles, WriteMode, record};
use serde_json::{Value, json};
use tower::ServiceExt;

// =============================================================================
// Test Helpers
// =============================================================================

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, minute, 0).unwrap()
}

/// Store with two generations of `pool_members` and one of `arp`.
async fn seeded() -> (Router, StorageHandles) {
    let handles = StorageBuilder::new(IN_MEMORY_PATH)
        .build()
        .expect("Failed to build storage");

    let generations: [(u32, Vec<Record>); 2] = [
        (
            0,
            vec![
                record! { "pool" => "P1", "member" => "10.0.0.1", "status" => "up" },
                record! { "pool" => "P1", "member" => "10.0.0.2", "status" => "up" },
            ],
        ),
        (
            15,
            vec![
                record! { "pool" => "P1", "member" => "10.0.0.1", "status" => "down" },
                record! { "pool" => "P1", "member" => "10.0.0.2", "status" => "up" },
            ],
        ),
    ];
    for (minute, rows) in generations {
        handles
            .writer
            .write("pool_members", rows, ts(minute), WriteMode::Append)
            .await
            .unwrap();
    }
    handles
        .writer
        .write(
            "arp",
            vec![
                record! { "ip" => "10.0.0.1", "mac" => "aa" },
                record! { "ip" => "10.0.0.1", "mac" => "bb" },
            ],
            ts(0),
            WriteMode::Append,
        )
        .await
        .unwrap();
    handles
        .writer
        .write(
            "arp",
            vec![record! { "ip" => "10.0.0.1", "mac" => "aa" }],
            ts(15),
            WriteMode::Append,
        )
        .await
        .unwrap();

    let router = create_router(AppState::new(
        handles.reader.clone(),
        handles.admin.clone(),
    ));
    (router, handles)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// Health Probe Tests
// =============================================================================

#[tokio::test]
async fn test_health_probes() {
    let (router, handles) = seeded().await;

    let (status, body) = get(&router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["db"], "ready");
    handles.shutdown().unwrap();
}

#[tokio::test]
async fn test_readyz_after_shutdown() {
    let (router, handles) = seeded().await;
    handles.shutdown().unwrap();

    let (status, body) = get(&router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not_ready");
}

// =============================================================================
// Table Introspection Tests
// =============================================================================

#[tokio::test]
async fn test_tables_schema_generations() {
    let (router, handles) = seeded().await;

    let (status, body) = get(&router, "/api/tables").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["arp", "pool_members"]);
    assert_eq!(body[1]["write_mode"], "append");

    let (status, body) = get(&router, "/api/tables/pool_members/schema").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["member", "pool", "status"]));

    let (status, body) = get(&router, "/api/tables/pool_members/generations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["rows"], 2);
    assert_eq!(
        body[0]["timestamp"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap(),
        ts(15)
    );

    let (status, body) = get(&router, "/api/tables/missing/schema").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
    handles.shutdown().unwrap();
}

// =============================================================================
// Diff Tests
// =============================================================================

#[tokio::test]
async fn test_diff_endpoint() {
    let (router, handles) = seeded().await;

    let (status, body) = get(&router, "/api/tables/pool_members/diff?key=pool,member").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource_key"], json!(["pool", "member"]));
    assert_eq!(
        body["records"],
        json!([{
            "key": ["P1", "10.0.0.1"],
            "field": "status",
            "previous": "up",
            "current": "down",
            "transition": "changed",
        }])
    );

    let (status, body) =
        get(&router, "/api/tables/pool_members/diff?key=pool,member&columns=pool").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], json!([]));
    handles.shutdown().unwrap();
}

#[tokio::test]
async fn test_diff_error_statuses() {
    let (router, handles) = seeded().await;

    let cases = [
        ("/api/tables/pool_members/diff", StatusCode::BAD_REQUEST),
        ("/api/tables/pool_members/diff?key=", StatusCode::BAD_REQUEST),
        ("/api/tables/pool_members/diff?key=vlan", StatusCode::BAD_REQUEST),
        ("/api/tables/missing/diff?key=id", StatusCode::NOT_FOUND),
        ("/api/tables/arp/diff?key=ip", StatusCode::CONFLICT),
    ];
    for (uri, expected) in cases {
        let (status, body) = get(&router, uri).await;
        assert_eq!(status, expected, "{uri}: {body}");
        assert!(body["error"].is_string(), "{uri}: {body}");
    }
    handles.shutdown().unwrap();
}
