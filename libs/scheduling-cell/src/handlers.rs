// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    CreateAppointmentTypeRequest, SlotQuery, UpsertBookingRulesRequest, UpsertWorkingHoursRequest,
};
use crate::router::SchedulingState;

/// Slot reads are the hottest query in the system; they go through the
/// stale-while-revalidate cache. Booking validation recomputes slots
/// directly and never reads this cache.
#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    Query(params): Query<SlotQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token().to_string();
    let date = params.date;
    let duration = params.duration;

    let cache_key = format!(
        "slots:{}:{}:{}",
        doctor_id,
        date,
        duration.unwrap_or_default()
    );

    let slots_service = Arc::clone(&state.slots);
    let slots = state
        .cache
        .get_or_set_swr(&cache_key, 30, 300, move || {
            let slots_service = Arc::clone(&slots_service);
            let token = token.clone();
            async move {
                slots_service
                    .get_available_slots(doctor_id, date, duration, &token)
                    .await
            }
        })
        .await
        .map_err(AppError::from)?;

    let formatted: Vec<String> = slots.iter().map(|t| t.format("%H:%M").to_string()).collect();

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": date,
        "slots": formatted
    })))
}

#[axum::debug_handler]
pub async fn get_working_hours(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token().to_string();
    let cache_key = format!("working-hours:{}", doctor_id);

    let schedule = Arc::clone(&state.schedule);
    let hours = state
        .cache
        .get_or_set(&cache_key, 60, || async move {
            schedule.get_working_hours(doctor_id, &token).await
        })
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "doctor_id": doctor_id, "working_hours": hours })))
}

#[axum::debug_handler]
pub async fn put_working_hours(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpsertWorkingHoursRequest>,
) -> Result<Json<Value>, AppError> {
    let hours = state
        .schedule
        .upsert_working_hours(doctor_id, request.entries, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor_id,
        "working_hours": hours
    })))
}

#[axum::debug_handler]
pub async fn get_booking_rules(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let rules = state
        .schedule
        .get_booking_rules(doctor_id, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!(rules)))
}

#[axum::debug_handler]
pub async fn put_booking_rules(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpsertBookingRulesRequest>,
) -> Result<Json<Value>, AppError> {
    let rules = state
        .schedule
        .upsert_booking_rules(doctor_id, request, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "success": true, "booking_rules": rules })))
}

#[axum::debug_handler]
pub async fn list_appointment_types(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let types = state
        .schedule
        .list_appointment_types(auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "appointment_types": types })))
}

#[axum::debug_handler]
pub async fn create_appointment_type(
    State(state): State<SchedulingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateAppointmentTypeRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment_type = state
        .schedule
        .create_appointment_type(request, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({
        "success": true,
        "appointment_type": appointment_type
    })))
}
