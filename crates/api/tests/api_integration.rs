//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::config::Config;
use api::state::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::{InMemoryEventStore, InMemoryHistoryStore, ObjectId, Version};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

type TestState = Arc<AppState<InMemoryEventStore, InMemoryHistoryStore>>;

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, TestState) {
    let state = api::create_default_state(
        InMemoryEventStore::new(),
        InMemoryHistoryStore::new(),
        &Config::default(),
    );
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn post_json(app: &axum::Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_empty(app: &axum::Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn ingest(app: &axum::Router, object_id: &str, version: i64) -> StatusCode {
    post_json(
        app,
        "/events",
        serde_json::json!({ "object_id": object_id, "version": version }),
    )
    .await
    .status()
}

/// Waits until the pipeline has published up to `version` for `object_id`.
async fn wait_for_watermark(state: &TestState, object_id: &str, version: i64) {
    let id = ObjectId::new(object_id);
    for _ in 0..200 {
        if state.dispatcher.last_processed_version(&id) == Some(Version::new(version)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("watermark of {object_id} never reached {version}");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = get(&app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tracked_objects"], 0);
}

#[tokio::test]
async fn test_ingest_is_accepted_and_published() {
    let (app, state) = setup();

    let response = post_json(
        &app,
        "/events",
        serde_json::json!({
            "object_id": "parcel-1",
            "version": 1,
            "group": "GOPS_EOD_CONTROL_SUB",
            "payload": "<parcel id=\"1\"/>"
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["group"], "GOPS_EOD_CONTROL_SUB");

    wait_for_watermark(&state, "parcel-1", 1).await;
    let published = state.publish.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].queue, "gopsEodControlSubQueue");
    assert!(published[0].payload.contains("<parcel id=\"1\"/>"));
}

#[tokio::test]
async fn test_out_of_order_ingest_publishes_in_order() {
    let (app, state) = setup();

    assert_eq!(ingest(&app, "parcel-2", 3).await, StatusCode::ACCEPTED);
    assert_eq!(ingest(&app, "parcel-2", 2).await, StatusCode::ACCEPTED);
    assert_eq!(ingest(&app, "parcel-2", 1).await, StatusCode::ACCEPTED);

    wait_for_watermark(&state, "parcel-2", 3).await;
    assert_eq!(
        state.publish.published_for(&ObjectId::new("parcel-2")),
        vec![Version::new(1), Version::new(2), Version::new(3)]
    );
}

#[tokio::test]
async fn test_ingest_rejects_invalid_requests() {
    let (app, _) = setup();

    assert_eq!(ingest(&app, "parcel-3", 0).await, StatusCode::BAD_REQUEST);
    assert_eq!(ingest(&app, "parcel-3", -4).await, StatusCode::BAD_REQUEST);
    assert_eq!(ingest(&app, "   ", 1).await, StatusCode::BAD_REQUEST);

    let response = post_json(
        &app,
        "/events",
        serde_json::json!({ "object_id": "parcel-3", "version": 1, "group": "NOT_A_GROUP" }),
    )
    .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_history_of_unknown_object_is_not_found() {
    let (app, _) = setup();

    let response = get(&app, "/objects/nobody/history").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_shows_buffered_versions() {
    let (app, state) = setup();

    ingest(&app, "parcel-4", 1).await;
    wait_for_watermark(&state, "parcel-4", 1).await;
    ingest(&app, "parcel-4", 3).await;

    let mut json = serde_json::Value::Null;
    for _ in 0..200 {
        json = json_body(get(&app, "/objects/parcel-4/history").await).await;
        if json["pending"].as_array().is_some_and(|p| p.len() == 1)
            && json["pending"][0]["state"] == "TRANSFORMED"
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(json["object_id"], "parcel-4");
    assert_eq!(json["last_processed_version"], 1);
    assert_eq!(json["pending"][0]["version"], 3);
    assert_eq!(json["pending"][0]["state"], "TRANSFORMED");
}

#[tokio::test]
async fn test_events_lists_stored_events() {
    let (app, state) = setup();

    ingest(&app, "parcel-5", 1).await;
    ingest(&app, "parcel-5", 2).await;
    wait_for_watermark(&state, "parcel-5", 2).await;

    let response = get(&app, "/objects/parcel-5/events").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["version"], 1);
    assert_eq!(events[1]["version"], 2);
    assert_eq!(events[0]["state"], "PUBLISHED");
    assert!(events[0]["id"].as_str().is_some());
    assert!(events[0]["transformed_payload"].as_str().is_some());
}

#[tokio::test]
async fn test_ack_and_processed_signals() {
    let (app, state) = setup();

    ingest(&app, "parcel-6", 1).await;
    wait_for_watermark(&state, "parcel-6", 1).await;

    let response = post_empty(&app, "/objects/parcel-6/versions/1/ack").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["outcome"], "acknowledged");

    let response = post_empty(&app, "/objects/parcel-6/versions/1/processed").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["outcome"], "processed");

    let events = json_body(get(&app, "/objects/parcel-6/events").await).await;
    assert_eq!(events[0]["state"], "APP_PROCESSED");
}

#[tokio::test]
async fn test_processed_for_unknown_event_is_not_found() {
    let (app, _) = setup();

    let response = post_empty(&app, "/objects/parcel-7/versions/1/processed").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_replay_after_publish_failure() {
    let (app, state) = setup();
    state.publish.set_fail_on_publish(true);

    ingest(&app, "parcel-8", 1).await;
    let id = ObjectId::new("parcel-8");
    for _ in 0..200 {
        let halted = state
            .dispatcher
            .history(&id)
            .and_then(|h| h.get(Version::new(1)).map(|e| e.transformed_payload.is_some()))
            .unwrap_or(false);
        if halted && state.publish.attempt_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.dispatcher.last_processed_version(&id), Some(Version::new(0)));

    state.publish.set_fail_on_publish(false);
    let response = post_empty(&app, "/objects/parcel-8/versions/1/replay").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["outcome"], "advanced");
    assert_eq!(json["watermark"], 1);
}

#[tokio::test]
async fn test_replay_of_unknown_object() {
    let (app, _) = setup();

    let response = post_empty(&app, "/objects/ghost/versions/1/replay").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["outcome"], "dropped");
    assert_eq!(json["reason"], "unknown_object");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, state) = setup();

    ingest(&app, "parcel-9", 1).await;
    wait_for_watermark(&state, "parcel-9", 1).await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sequencer_events_total"));
    assert!(text.contains("ingress_events_total"));
}
