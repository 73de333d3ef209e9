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

use cache_cell::ReadCacheService;
use scheduling_cell::router::{scheduling_routes, SchedulingState};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

fn test_config(base_url: String) -> AppConfig {
    AppConfig {
        supabase_url: base_url,
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_service_role_key: "test-service-key".to_string(),
        payment_provider_url: String::new(),
        payment_provider_api_key: String::new(),
        redis_url: None,
        payout_sweep_interval_seconds: 0,
    }
}

fn test_app(config: &AppConfig) -> Router {
    let supabase = Arc::new(SupabaseClient::new(config));
    let cache = Arc::new(ReadCacheService::new(config));
    scheduling_routes(SchedulingState::new(supabase, cache))
}

fn working_hours_row(doctor_id: &Uuid, day_of_week: i32, start: &str, end: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "day_of_week": day_of_week,
        "start_time": start,
        "end_time": end,
        "is_working": true,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

fn appointment_row(doctor_id: &Uuid, date: &str, start: &str, duration_minutes: i32) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "appointment_date": date,
        "start_time": start,
        "duration_minutes": duration_minutes,
        "status": "pending"
    })
}

async fn mount_schedule_mocks(
    server: &MockServer,
    doctor_id: &Uuid,
    appointments: Vec<Value>,
) {
    // No configured booking rules: platform defaults (30-minute slots) apply.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_booking_rules"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;

    // Monday morning shift.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            working_hours_row(doctor_id, 1, "09:00:00", "12:00:00")
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(appointments)))
        .mount(server)
        .await;
}

async fn get_slots(app: Router, doctor_id: &Uuid, date: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/doctors/{}/slots?date={}", doctor_id, date))
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    (status, body)
}

#[tokio::test]
async fn empty_monday_morning_yields_all_half_hour_slots() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    mount_schedule_mocks(&server, &doctor_id, vec![]).await;

    let app = test_app(&test_config(server.uri()));

    // 2025-01-06 is a Monday.
    let (status, body) = get_slots(app, &doctor_id, "2025-01-06").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["slots"],
        json!(["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"])
    );
}

#[tokio::test]
async fn booked_slot_disappears_from_the_listing() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    mount_schedule_mocks(
        &server,
        &doctor_id,
        vec![appointment_row(&doctor_id, "2025-01-06", "09:30:00", 30)],
    )
    .await;

    let app = test_app(&test_config(server.uri()));

    let (status, body) = get_slots(app, &doctor_id, "2025-01-06").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["slots"],
        json!(["09:00", "10:00", "10:30", "11:00", "11:30"])
    );
}

#[tokio::test]
async fn non_working_day_yields_no_slots() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_booking_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // No working-hours row for the requested weekday.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let app = test_app(&test_config(server.uri()));

    let (status, body) = get_slots(app, &doctor_id, "2025-01-05").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slots"], json!([]));
}

#[tokio::test]
async fn allow_list_restricts_candidates() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_booking_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "allowed_time_slots": ["09:00", "11:00"],
            "slot_duration_minutes": 30,
            "booking_advance_days_max": 90,
            "min_booking_hours_ahead": 2,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_working_hours"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            working_hours_row(&doctor_id, 1, "09:00:00", "12:00:00")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let app = test_app(&test_config(server.uri()));

    let (status, body) = get_slots(app, &doctor_id, "2025-01-06").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slots"], json!(["09:00", "11:00"]));
}
