use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use qdesk::dashboard::{router, DashboardState};
use qdesk::service::QueueService;
use qdesk::store::MemoryStore;

/// Create a test app over a fresh in-memory store
fn create_test_app() -> (Router, Arc<QueueService>) {
    let service = Arc::new(QueueService::new(Arc::new(MemoryStore::new())));
    let app = router(DashboardState::new(service.clone()));
    (app, service)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
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
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();
    let (status, body) = call(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_take_token_and_lookup() {
    let (app, _) = create_test_app();

    let (status, token) = call(&app, "POST", "/api/tokens", Some(json!({ "name": "Ada" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(token["token_number"], 1);
    assert_eq!(token["status"], "waiting");

    let id = token["id"].as_str().unwrap();
    let (status, by_id) = call(&app, "GET", &format!("/api/tokens/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["name"], "Ada");

    let (status, by_number) = call(&app, "GET", "/api/tokens/number/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["id"], token["id"]);
}

#[tokio::test]
async fn test_not_found_and_validation_errors() {
    let (app, _) = create_test_app();

    let uri = format!("/api/tokens/{}", uuid::Uuid::new_v4());
    let (status, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("Token not found"));

    let (status, body) = call(&app, "GET", "/api/desks/number/9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "POST", "/api/tokens", Some(json!({ "name": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("name"));

    let (status, _) = call(&app, "GET", "/api/tokens?status=waiting,bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_bodies_are_validation_errors() {
    let (app, service) = create_test_app();

    let (status, body) = call(&app, "POST", "/api/tokens", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("name"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/desks")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());

    let token = service.take_token("Ada").await.unwrap();
    let uri = format!("/api/tokens/{}/pay", token.id);
    let (status, body) = call(&app, "POST", &uri, Some(json!({ "fee_cents": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let uri = format!("/api/desks/{}/status", uuid::Uuid::new_v4());
    let (status, _) = call(&app, "PUT", &uri, Some(json!({ "status": "busy" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let (app, _) = create_test_app();

    call(&app, "POST", "/api/tokens", Some(json!({ "name": "T1" }))).await;
    call(&app, "POST", "/api/tokens", Some(json!({ "name": "T2" }))).await;
    let (status, desk) = call(
        &app,
        "POST",
        "/api/desks",
        Some(json!({ "name": "Front", "operator_name": "Sam" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(desk["desk_number"], 1);
    assert_eq!(desk["status"], "free");

    let (status, body) = call(&app, "POST", "/api/auto-assign", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], true);
    assert_eq!(body["assignment"]["token"]["token_number"], 1);
    assert_eq!(body["assignment"]["desk"]["status"], "occupied");

    let (_, waiting) = call(&app, "GET", "/api/tokens?status=waiting", None).await;
    assert_eq!(waiting.as_array().unwrap().len(), 1);
    assert_eq!(waiting[0]["name"], "T2");

    let (status, done) = call(&app, "POST", "/api/desks/number/1/complete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["applied"], true);
    assert_eq!(done["result"]["token"]["status"], "completed");
    assert_eq!(done["result"]["desk"]["total_tokens_served"], 1);

    let token_id = done["result"]["token"]["id"].as_str().unwrap().to_string();
    let pay_uri = format!("/api/tokens/{}/pay", token_id);
    let (status, paid) = call(&app, "POST", &pay_uri, Some(json!({ "fee_cents": 450 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["applied"], true);
    assert_eq!(paid["result"]["status"], "paid");

    // Paying again without a body is an idempotent no-op
    let (status, again) = call(&app, "POST", &pay_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["applied"], false);
    assert_eq!(again["result"]["fee_cents"], 450);

    let (status, summary) = call(&app, "GET", "/api/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["issued"], 2);
    assert_eq!(summary["paid"], 1);
    assert_eq!(summary["revenue_cents"], 450);
}

#[tokio::test]
async fn test_invalid_transitions_map_to_conflict() {
    let (app, _) = create_test_app();

    let (_, token) = call(&app, "POST", "/api/tokens", Some(json!({ "name": "A" }))).await;
    let id = token["id"].as_str().unwrap();

    let (status, body) = call(&app, "POST", &format!("/api/tokens/{}/complete", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Invalid transition"));

    let (_, desk) = call(&app, "POST", "/api/desks", Some(json!({ "name": "D" }))).await;
    let desk_id = desk["id"].as_str().unwrap();
    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/desks/{}/status", desk_id),
        Some(json!({ "status": "occupied" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_assign_and_cancel() {
    let (app, _) = create_test_app();

    call(&app, "POST", "/api/tokens", Some(json!({ "name": "first" }))).await;
    let (_, second) = call(&app, "POST", "/api/tokens", Some(json!({ "name": "second" }))).await;
    let (_, desk) = call(&app, "POST", "/api/desks", Some(json!({ "name": "D" }))).await;

    let token_id = second["id"].as_str().unwrap();
    let (status, assignment) = call(
        &app,
        "POST",
        &format!("/api/tokens/{}/assign", token_id),
        Some(json!({ "desk_id": desk["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["token"]["name"], "second");

    let (status, cancelled) =
        call(&app, "POST", &format!("/api/tokens/{}/cancel", token_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["result"]["status"], "cancelled");

    let (_, desk) = call(&app, "GET", "/api/desks/number/1", None).await;
    assert_eq!(desk["status"], "free");
    assert_eq!(desk["total_tokens_served"], 0);
}

#[tokio::test]
async fn test_desk_admin_endpoints() {
    let (app, _) = create_test_app();
    let (_, desk) = call(&app, "POST", "/api/desks", Some(json!({ "name": "D" }))).await;
    let id = desk["id"].as_str().unwrap();

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/desks/{}/status", id),
        Some(json!({ "status": "maintenance" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["result"]["status"], "maintenance");

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/desks/{}/active", id),
        Some(json!({ "is_active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/desks/{}/operator", id),
        Some(json!({ "operator_name": "Kim" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operator_name"], "Kim");

    let (_, desks) = call(&app, "GET", "/api/desks?active_only=true", None).await;
    assert!(desks.as_array().unwrap().is_empty());
    let (_, desks) = call(&app, "GET", "/api/desks?status=maintenance", None).await;
    assert_eq!(desks.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_settings_roundtrip() {
    let (app, _) = create_test_app();

    let (status, settings) = call(&app, "GET", "/api/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["auto_assign_enabled"], false);

    let (status, settings) = call(
        &app,
        "PUT",
        "/api/settings",
        Some(json!({ "auto_assign_enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["auto_assign_enabled"], true);

    let (_, board) = call(&app, "GET", "/api/board", None).await;
    assert_eq!(board["settings"]["auto_assign_enabled"], true);
}

#[tokio::test]
async fn test_audit_and_reconcile_on_clean_store() {
    let (app, _) = create_test_app();
    let (status, audit) = call(&app, "GET", "/api/audit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit, json!([]));

    let (status, repaired) = call(&app, "POST", "/api/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repaired, json!([]));
}

#[tokio::test]
async fn test_summary_for_other_day() {
    let (app, _) = create_test_app();
    call(&app, "POST", "/api/tokens", Some(json!({ "name": "A" }))).await;

    let (status, summary) = call(&app, "GET", "/api/summary?date=2001-01-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["date"], "2001-01-01");
    assert_eq!(summary["issued"], 0);
}
