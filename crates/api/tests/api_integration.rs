//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use api::InMemoryState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::PaymentHandle;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::PaymentOutcome;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

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

fn setup() -> axum::Router {
    setup_with_state(Config::default()).0
}

fn setup_with_state(config: Config) -> (axum::Router, Arc<InMemoryState>) {
    let state = api::create_default_state(&config);
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn pending_payments() -> Config {
    Config {
        payment_outcome: PaymentOutcome::Pending,
        ..Config::default()
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
}

async fn post_empty(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

/// Registers a $12.50 showtime and returns its id.
async fn register_showtime(app: &axum::Router, total_tickets: u32) -> String {
    let (status, json) = post(
        app,
        "/showtimes",
        json!({ "total_tickets": total_tickets, "ticket_price_cents": 1250 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["showtime_id"].as_str().unwrap().to_string()
}

async fn purchase(app: &axum::Router, showtime_id: &str, quantity: u32) -> (StatusCode, Value) {
    post(
        app,
        &format!("/showtimes/{showtime_id}/purchase"),
        json!({ "quantity": quantity, "contact_email": "ada@example.com" }),
    )
    .await
}

async fn availability(app: &axum::Router, showtime_id: &str) -> Value {
    let (status, json) = get(app, &format!("/showtimes/{showtime_id}/availability")).await;
    assert_eq!(status, StatusCode::OK);
    json
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint_reports_holds() {
    let app = setup();
    let showtime_id = register_showtime(&app, 10).await;
    let (status, _) = purchase(&app, &showtime_id, 1).await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("reservation_holds_total"));
}

#[tokio::test]
async fn test_register_and_list_showtimes() {
    let app = setup();
    let showtime_id = uuid::Uuid::new_v4().to_string();

    let (status, json) = post(
        &app,
        "/showtimes",
        json!({
            "showtime_id": showtime_id,
            "total_tickets": 40,
            "ticket_price_cents": 900,
            "currency": "EUR"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["showtime_id"], showtime_id);
    assert_eq!(json["available"], 40);

    let (status, json) = get(&app, "/showtimes").await;
    assert_eq!(status, StatusCode::OK);
    let showtimes = json.as_array().unwrap();
    assert_eq!(showtimes.len(), 1);
    assert_eq!(showtimes[0]["showtime_id"], showtime_id);
    assert_eq!(showtimes[0]["ticket_price_cents"], 900);
    assert_eq!(showtimes[0]["currency"], "eur");
    assert_eq!(showtimes[0]["available"], 40);
}

#[tokio::test]
async fn test_register_rejects_invalid_and_duplicate_showtimes() {
    let app = setup();

    let (status, _) = post(
        &app,
        "/showtimes",
        json!({ "total_tickets": 0, "ticket_price_cents": 900 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        "/showtimes",
        json!({ "total_tickets": 5, "ticket_price_cents": -1 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let showtime_id = register_showtime(&app, 5).await;
    let (status, _) = post(
        &app,
        "/showtimes",
        json!({ "showtime_id": showtime_id, "total_tickets": 8, "ticket_price_cents": 900 }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_purchase_holds_tickets() {
    let app = setup();
    let showtime_id = register_showtime(&app, 10).await;

    let (status, json) = purchase(&app, &showtime_id, 3).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(json["reservation_id"].as_str().is_some());
    assert!(json["payment_handle"].as_str().is_some());
    assert_eq!(json["amount_due_cents"], 3750);
    assert_eq!(json["currency"], "usd");
    assert!(json["expires_at"].as_str().is_some());

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 3);
    assert_eq!(counts["confirmed"], 0);
    assert_eq!(counts["available"], 7);
}

#[tokio::test]
async fn test_purchase_beyond_capacity_is_a_conflict() {
    let app = setup();
    let showtime_id = register_showtime(&app, 4).await;

    let (status, _) = purchase(&app, &showtime_id, 3).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = purchase(&app, &showtime_id, 2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("1 tickets left"));

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 3);
}

#[tokio::test]
async fn test_purchase_validation_errors() {
    let app = setup();
    let showtime_id = register_showtime(&app, 20).await;

    let (status, _) = purchase(&app, &showtime_id, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = purchase(&app, &showtime_id, 11).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        &format!("/showtimes/{showtime_id}/purchase"),
        json!({ "quantity": 1, "contact_email": "not-an-email" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = purchase(&app, "not-a-uuid", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = purchase(&app, &uuid::Uuid::new_v4().to_string(), 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 0);
}

#[tokio::test]
async fn test_confirm_after_successful_payment() {
    let app = setup();
    let showtime_id = register_showtime(&app, 10).await;
    let (_, receipt) = purchase(&app, &showtime_id, 2).await;
    let reservation_id = receipt["reservation_id"].as_str().unwrap();

    let (status, json) = post_empty(&app, &format!("/reservations/{reservation_id}/confirm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reservation_id"], reservation_id);
    assert_eq!(json["status"], "CONFIRMED");
    assert!(json.get("release_reason").is_none());

    // Confirming again reports the same outcome without touching inventory.
    let (status, json) = post_empty(&app, &format!("/reservations/{reservation_id}/confirm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CONFIRMED");

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 0);
    assert_eq!(counts["confirmed"], 2);
    assert_eq!(counts["available"], 8);
}

#[tokio::test]
async fn test_confirm_while_pending_then_failed() {
    let (app, state) = setup_with_state(pending_payments());
    let showtime_id = register_showtime(&app, 10).await;
    let (_, receipt) = purchase(&app, &showtime_id, 2).await;
    let reservation_id = receipt["reservation_id"].as_str().unwrap();
    let confirm_uri = format!("/reservations/{reservation_id}/confirm");

    let (status, json) = post_empty(&app, &confirm_uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "PENDING");
    assert_eq!(availability(&app, &showtime_id).await["held"], 2);

    let handle = PaymentHandle::from(receipt["payment_handle"].as_str().unwrap());
    assert!(
        state
            .coordinator
            .payment()
            .set_outcome(&handle, PaymentOutcome::Failed)
    );

    let (status, json) = post_empty(&app, &confirm_uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "RELEASED");
    assert_eq!(json["release_reason"], "payment_failed");

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 0);
    assert_eq!(counts["available"], 10);
}

#[tokio::test]
async fn test_cancel_returns_tickets() {
    let (app, _) = setup_with_state(pending_payments());
    let showtime_id = register_showtime(&app, 6).await;
    let (_, receipt) = purchase(&app, &showtime_id, 4).await;
    let reservation_id = receipt["reservation_id"].as_str().unwrap();

    let (status, json) = post_empty(&app, &format!("/reservations/{reservation_id}/cancel")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "RELEASED");
    assert_eq!(json["release_reason"], "cancelled");
    assert_eq!(availability(&app, &showtime_id).await["available"], 6);

    // A late confirm sees the terminal state.
    let (status, json) = post_empty(&app, &format!("/reservations/{reservation_id}/confirm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "RELEASED");
    assert_eq!(availability(&app, &showtime_id).await["available"], 6);
}

#[tokio::test]
async fn test_get_reservation_records_caller() {
    let app = setup();
    let showtime_id = register_showtime(&app, 10).await;

    let (status, receipt) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri(format!("/showtimes/{showtime_id}/purchase"))
            .header("content-type", "application/json")
            .header("x-caller-id", "user-42")
            .body(Body::from(
                serde_json::to_string(&json!({
                    "quantity": 1,
                    "contact_email": "Grace@Example.com"
                }))
                .unwrap(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let reservation_id = receipt["reservation_id"].as_str().unwrap();

    let (status, json) = get(&app, &format!("/reservations/{reservation_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reservation_id"], reservation_id);
    assert_eq!(json["showtime_id"], showtime_id);
    assert_eq!(json["quantity"], 1);
    assert_eq!(json["amount_due_cents"], 1250);
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["payment_handle"], receipt["payment_handle"]);
    assert_eq!(json["requested_by"], "user-42");
    assert_eq!(json["version"], 2);

    let (status, json) = get(&app, &format!("/showtimes/{showtime_id}/reservations")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_nonexistent_reservation() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4();

    let (status, _) = get(&app, &format!("/reservations/{fake_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_empty(&app, &format!("/reservations/{fake_id}/confirm")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/reservations/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retried_purchase_with_same_reservation_id_holds_once() {
    let app = setup();
    let showtime_id = register_showtime(&app, 10).await;
    let reservation_id = uuid::Uuid::new_v4().to_string();
    let body = json!({
        "quantity": 2,
        "contact_email": "ada@example.com",
        "reservation_id": reservation_id
    });
    let uri = format!("/showtimes/{showtime_id}/purchase");

    let (first_status, first) = post(&app, &uri, body.clone()).await;
    let (second_status, second) = post(&app, &uri, body).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first["reservation_id"], reservation_id);
    assert_eq!(first["payment_handle"], second["payment_handle"]);
    assert_eq!(availability(&app, &showtime_id).await["held"], 2);
}

#[tokio::test]
async fn test_purchase_during_payment_outage_releases_hold() {
    let (app, state) = setup_with_state(Config::default());
    let showtime_id = register_showtime(&app, 5).await;
    state.coordinator.payment().set_unavailable(true);

    let (status, json) = purchase(&app, &showtime_id, 2).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().is_some());

    let counts = availability(&app, &showtime_id).await;
    assert_eq!(counts["held"], 0);
    assert_eq!(counts["available"], 5);
}
