use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use settlement_cell::router::{webhook_routes, SettlementState};
use settlement_cell::services::payments::PaymentProviderClient;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

fn test_config(base_url: String) -> AppConfig {
    AppConfig {
        supabase_url: base_url.clone(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_service_role_key: "test-service-key".to_string(),
        payment_provider_url: base_url,
        payment_provider_api_key: "test-provider-key".to_string(),
        redis_url: None,
        payout_sweep_interval_seconds: 0,
    }
}

fn webhook_app(config: &AppConfig) -> Router {
    let supabase = Arc::new(SupabaseClient::new(config));
    let payments = Arc::new(PaymentProviderClient::new(config));
    let state = SettlementState::new(supabase, payments, config.supabase_service_role_key.clone());

    webhook_routes(state)
}

fn settlement_row(settlement_id: &Uuid, patient_paid: bool, status: &str) -> Value {
    json!({
        "id": settlement_id,
        "appointment_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "price": 100.0,
        "commission_amount": 5.0,
        "commission_percentage_used": 5.0,
        "payout_amount": 95.0,
        "patient_paid": patient_paid,
        "patient_paid_at": if patient_paid { json!("2025-01-10T10:00:00Z") } else { json!(null) },
        "doctor_paid": false,
        "doctor_paid_at": null,
        "payout_scheduled_at": null,
        "payout_on_hold": false,
        "status": status,
        "refunded": false,
        "refund_amount": 0.0,
        "refund_type": null,
        "manual_reversal_required": false,
        "payment_ref": "pay_1",
        "charge_ref": if patient_paid { json!("ch_1") } else { json!(null) },
        "transfer_ref": null,
        "payout_error": null,
        "created_at": "2025-01-09T10:00:00Z",
        "updated_at": "2025-01-09T10:00:00Z"
    })
}

async fn post_webhook(app: Router, route: &str, body: Value) -> StatusCode {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(route)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    response.status()
}

#[tokio::test]
async fn payment_success_marks_the_settlement_paid() {
    let server = MockServer::start().await;
    let settlement_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("payment_ref", "eq.pay_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&settlement_id, false, "processing")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("patient_paid", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&settlement_id, true, "completed")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let app = webhook_app(&test_config(server.uri()));

    let status = post_webhook(
        app,
        "/payments",
        json!({
            "event": "payment_succeeded",
            "payment_ref": "pay_1",
            "charge_ref": "ch_1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_payment_success_is_a_no_op() {
    let server = MockServer::start().await;
    let settlement_id = Uuid::new_v4();

    // The settlement already reflects the payment; a redelivered event must
    // not touch the store again.
    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("payment_ref", "eq.pay_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&settlement_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let app = webhook_app(&test_config(server.uri()));

    let status = post_webhook(
        app,
        "/payments",
        json!({
            "event": "payment_succeeded",
            "payment_ref": "pay_1",
            "charge_ref": "ch_1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn late_payment_failure_does_not_unsettle_a_completed_payment() {
    let server = MockServer::start().await;
    let settlement_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("payment_ref", "eq.pay_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&settlement_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let app = webhook_app(&test_config(server.uri()));

    let status = post_webhook(
        app,
        "/payments",
        json!({
            "event": "payment_failed",
            "payment_ref": "pay_1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn transfer_reversal_parks_the_settlement_on_hold() {
    let server = MockServer::start().await;
    let settlement_id = Uuid::new_v4();

    let mut paid = settlement_row(&settlement_id, true, "completed");
    paid["doctor_paid"] = json!(true);
    paid["doctor_paid_at"] = json!("2025-01-10T16:00:00Z");
    paid["transfer_ref"] = json!("tr_1");

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("transfer_ref", "eq.tr_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([paid])))
        .mount(&server)
        .await;

    let mut reversed = settlement_row(&settlement_id, true, "completed");
    reversed["payout_on_hold"] = json!(true);
    reversed["transfer_ref"] = json!("tr_1");

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([reversed])))
        .expect(1)
        .mount(&server)
        .await;

    let app = webhook_app(&test_config(server.uri()));

    let status = post_webhook(
        app,
        "/transfers",
        json!({
            "event": "transfer_reversed",
            "transfer_ref": "tr_1"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_payment_ref_returns_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let app = webhook_app(&test_config(server.uri()));

    let status = post_webhook(
        app,
        "/payments",
        json!({
            "event": "payment_succeeded",
            "payment_ref": "pay_unknown",
            "charge_ref": "ch_x"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
