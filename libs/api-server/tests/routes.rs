use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt; // for oneshot()

use sensor_api::SettingsStore;
use sensor_api_server::{AppState, StreamConfig, router};
use sensor_engine::{Engine, EngineConfig, SystemClock};
use storage_memory::MemoryStorage;

async fn app_with(storage: Arc<MemoryStorage>) -> (Router, Engine) {
    let token = CancellationToken::new();
    let engine = Engine::bootstrap(
        &EngineConfig::default(),
        storage.clone(),
        storage,
        Arc::new(SystemClock),
        token.clone(),
    )
    .await
    .unwrap();
    let app = router(AppState::from_engine(&engine, StreamConfig::default(), token));
    (app, engine)
}

async fn app() -> (Router, Engine) {
    app_with(Arc::new(MemoryStorage::default())).await
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    let v = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| panic!("HTTP {status}: {}", String::from_utf8_lossy(&bytes)));
    (status, v)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn reading(sensor: &str, value: f64) -> Value {
    json!({
        "sensor_id": sensor,
        "sensor_name": "Kitchen",
        "values": [
            { "measurement": "temperature", "value": value, "unit": "C" },
            { "measurement": "pm", "parameter": "2.5", "value": 4.0 }
        ]
    })
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _engine) = app().await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn second_batch_in_window_is_accepted_but_not_stored() {
    let (app, _engine) = app().await;

    let (status, body) = send_json(&app, with_json("POST", "/api/measurements", reading("s1", 20.0))).await;
    assert_eq!(status, StatusCode::CREATED);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["measurement"], "temperature");
    assert_eq!(records[1]["parameter"], "2.5");

    let (status, body) = send_json(&app, with_json("POST", "/api/measurements", reading("s1", 21.0))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "status": "skipped", "reason": "store interval not reached" }));

    let (_, page) = send_json(&app, get("/api/measurements")).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], false);
    assert!(page.get("next_cursor").is_none());
}

#[tokio::test]
async fn invalid_bodies_are_bad_requests() {
    let (app, _engine) = app().await;

    let (status, body) = send_json(
        &app,
        with_json("POST", "/api/measurements", json!({ "sensor_id": "s1", "values": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let req = Request::builder()
        .method("POST")
        .uri("/api/measurements")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn pages_follow_cursor_and_reject_garbage() {
    let storage = Arc::new(MemoryStorage::default());
    storage.upsert_setting("store_interval", "0").await.unwrap();
    let (app, _engine) = app_with(storage).await;

    for i in 0..3 {
        let (status, _) = send(&app, with_json("POST", "/api/measurements", reading("s1", i as f64))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, first) = send_json(&app, get("/api/measurements?limit=4&sensor=s1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["items"].as_array().unwrap().len(), 4);
    assert_eq!(first["has_more"], true);
    let cursor = first["next_cursor"].as_str().unwrap().to_string();

    let (_, second) = send_json(&app, get(&format!("/api/measurements?limit=4&sensor=s1&cursor={cursor}"))).await;
    let ids: Vec<i64> = second["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(second["has_more"], false);

    let (status, body) = send_json(&app, get("/api/measurements?cursor=@@@")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "bad_request", "message": "bad cursor" }));

    // Nonsense limits fall back to the default page size.
    let (status, _) = send_json(&app, get("/api/measurements?limit=abc")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn sensors_are_listed_after_persisted_batch() {
    let (app, _engine) = app().await;
    send(&app, with_json("POST", "/api/measurements", reading("s1", 1.0))).await;

    let (status, body) = send_json(&app, get("/api/sensors")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["sensor_id"], "s1");
    assert_eq!(body[0]["sensor_name"], "Kitchen");
    assert_eq!(body[0]["measurements"], json!(["pm", "temperature"]));
}

#[tokio::test]
async fn settings_round_trip_and_apply_live() {
    let (app, engine) = app().await;

    let (status, all) = send_json(&app, get("/api/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (status, item) = send_json(&app, get("/api/settings/max_age")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["value"], "2678400");

    let (status, _) = send_json(&app, get("/api/settings/colour")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, item) = send_json(&app, with_json("PUT", "/api/settings/store_interval", json!({ "value": 0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["value"], "0");
    assert_eq!(engine.settings().store_interval_ms(), 0);

    let (status, _) = send_json(&app, with_json("PUT", "/api/settings/store_interval", json!({ "value": "-1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send_json(&app, with_json("PUT", "/api/settings/colour", json!({ "value": "1" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Interval is zero now, so back-to-back batches are both stored.
    for _ in 0..2 {
        let (status, _) = send(&app, with_json("POST", "/api/measurements", reading("s2", 1.0))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
}
