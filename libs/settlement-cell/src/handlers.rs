// libs/settlement-cell/src/handlers.rs
use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{PaymentEvent, UpdatePlatformSettingsRequest};
use crate::router::SettlementState;

#[axum::debug_handler]
pub async fn get_settlement_for_appointment(
    State(state): State<SettlementState>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let settlement = state
        .settlements
        .get_by_appointment(appointment_id, auth.token())
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::NotFound("No settlement for this appointment".to_string()))?;

    Ok(Json(json!(settlement)))
}

#[axum::debug_handler]
pub async fn get_platform_settings(
    State(state): State<SettlementState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .platform
        .get_or_init(auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!(settings)))
}

#[axum::debug_handler]
pub async fn put_platform_settings(
    State(state): State<SettlementState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpdatePlatformSettingsRequest>,
) -> Result<Json<Value>, AppError> {
    let settings = state
        .platform
        .update(request, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "success": true, "platform_settings": settings })))
}

/// Manual sweep trigger; the same entry point the periodic task uses.
#[axum::debug_handler]
pub async fn run_payout_sweep(
    State(state): State<SettlementState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let report = state
        .payouts
        .run_sweep(Utc::now(), auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "success": true, "report": report })))
}

#[axum::debug_handler]
pub async fn release_payout_hold(
    State(state): State<SettlementState>,
    Path(settlement_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let settlement = state
        .payouts
        .release_payout_hold(settlement_id, auth.token())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "success": true, "settlement": settlement })))
}

// Webhook receivers authenticate at the edge (signature verification is the
// surrounding layer's concern) and run against the store with the service
// role, since the provider carries no user token.

#[axum::debug_handler]
pub async fn payment_webhook(
    State(state): State<SettlementState>,
    Json(event): Json<PaymentEvent>,
) -> Result<Json<Value>, AppError> {
    state
        .events
        .handle(event, &state.service_role_key)
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "received": true })))
}

#[axum::debug_handler]
pub async fn transfer_webhook(
    State(state): State<SettlementState>,
    Json(event): Json<PaymentEvent>,
) -> Result<Json<Value>, AppError> {
    state
        .events
        .handle(event, &state.service_role_key)
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({ "received": true })))
}
