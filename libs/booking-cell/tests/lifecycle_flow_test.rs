use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::models::{
    AppointmentStatus, BookingError, CancelAppointmentRequest,
};
use booking_cell::services::booking::BookingService;
use scheduling_cell::services::schedule::ScheduleService;
use scheduling_cell::services::slots::SlotCalculatorService;
use settlement_cell::services::commission::PlatformSettingsService;
use settlement_cell::services::payments::PaymentProviderClient;
use settlement_cell::services::payout::PayoutService;
use settlement_cell::services::refund::RefundService;
use settlement_cell::services::settlement::SettlementService;
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

fn booking_service(config: &AppConfig) -> BookingService {
    let supabase = Arc::new(SupabaseClient::new(config));
    let payments = Arc::new(PaymentProviderClient::new(config));

    let schedule = Arc::new(ScheduleService::new(Arc::clone(&supabase)));
    let slots = Arc::new(SlotCalculatorService::new(
        Arc::clone(&supabase),
        Arc::clone(&schedule),
    ));
    let settlements = Arc::new(SettlementService::new(
        Arc::clone(&supabase),
        Arc::clone(&payments),
    ));
    let refunds = Arc::new(RefundService::new(Arc::clone(&supabase), Arc::clone(&payments)));
    let payouts = Arc::new(PayoutService::new(
        Arc::clone(&supabase),
        Arc::clone(&payments),
        Arc::clone(&settlements),
    ));
    let platform = Arc::new(PlatformSettingsService::new(Arc::clone(&supabase)));

    BookingService::new(supabase, schedule, slots, settlements, refunds, payouts, platform)
}

fn appointment_row(appointment_id: &Uuid, date: &str, start: &str, status: &str) -> Value {
    json!({
        "id": appointment_id,
        "doctor_id": Uuid::new_v4(),
        "patient_id": Uuid::new_v4(),
        "appointment_date": date,
        "start_time": start,
        "duration_minutes": 30,
        "status": status,
        "reason": null,
        "notes": null,
        "appointment_type_id": null,
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

fn settlement_row(appointment_id: &Uuid, patient_paid: bool, status: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "appointment_id": appointment_id,
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

#[tokio::test]
async fn unpaid_settlement_blocks_confirmation() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let date = (Utc::now() + Duration::days(2)).date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "pending")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, false, "processing")
        ])))
        .mount(&server)
        .await;

    // The gate must reject before any status write.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let service = booking_service(&test_config(server.uri()));

    let result = service
        .update_appointment_status(appointment_id, AppointmentStatus::Confirmed, "test-token")
        .await;

    assert_matches!(result, Err(BookingError::PaymentNotProcessed));
}

#[tokio::test]
async fn paid_settlement_confirms_and_schedules_the_payout() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let date = (Utc::now() + Duration::days(2)).date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "pending")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    // No payout account: confirmation still proceeds, payout just waits.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_payout_accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "confirmed")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    // schedule_payout stamps payout_scheduled_at = starts_at + 2h.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "completed")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let service = booking_service(&test_config(server.uri()));

    let appointment = service
        .update_appointment_status(appointment_id, AppointmentStatus::Confirmed, "test-token")
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn completed_appointments_cannot_be_rescheduled_or_cancelled() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    let date = (Utc::now() + Duration::days(2)).date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "completed")
        ])))
        .mount(&server)
        .await;

    let service = booking_service(&test_config(server.uri()));

    let cancel = service
        .cancel_appointment(
            appointment_id,
            CancelAppointmentRequest { reason: Some("too late".to_string()) },
            "test-token",
        )
        .await;
    assert_matches!(cancel, Err(BookingError::InvalidStatusTransition { .. }));

    let reschedule = service
        .reschedule_appointment(
            appointment_id,
            booking_cell::models::RescheduleAppointmentRequest {
                new_date: (Utc::now() + Duration::days(3)).date_naive(),
                new_time: "10:00".to_string(),
            },
            "test-token",
        )
        .await;
    assert_matches!(reschedule, Err(BookingError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn early_cancellation_refunds_in_full() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    // Two days out: well inside the full-refund tier.
    let date = (Utc::now() + Duration::days(2)).date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "confirmed")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, "14:00:00", "cancelled")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("appointment_id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    // Full tier: the whole price goes back to the patient.
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "re_1" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .and(query_param("refunded", "eq.false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "refunded")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/refund_records"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .expect(1)
        .mount(&server)
        .await;

    let service = booking_service(&test_config(server.uri()));

    let appointment = service
        .cancel_appointment(
            appointment_id,
            CancelAppointmentRequest { reason: Some("patient request".to_string()) },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn last_minute_cancellation_issues_no_external_refund() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4();
    // 30 minutes out: inside the no-refund window.
    let starts_at = Utc::now() + Duration::minutes(30);
    let date = starts_at.date_naive().to_string();
    let time = starts_at.format("%H:%M:00").to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, &time, "confirmed")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(&appointment_id, &date, &time, "cancelled")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    // No money moves; only the refund decision is recorded.
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "re_x" })))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settlements"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            settlement_row(&appointment_id, true, "completed")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/refund_records"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .expect(1)
        .mount(&server)
        .await;

    let service = booking_service(&test_config(server.uri()));

    let appointment = service
        .cancel_appointment(
            appointment_id,
            CancelAppointmentRequest { reason: None },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}
