use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use booking_cell::router::{booking_routes, BookingState};
use cache_cell::ReadCacheService;
use scheduling_cell::router::{scheduling_routes, SchedulingState};
use settlement_cell::router::{settlement_routes, webhook_routes, SettlementState};
use settlement_cell::PaymentProviderClient;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

/// All cell states, built once at startup around shared store/cache/provider
/// handles.
pub struct AppCells {
    pub scheduling: SchedulingState,
    pub booking: BookingState,
    pub settlement: SettlementState,
}

impl AppCells {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let cache = Arc::new(ReadCacheService::new(config));
        let payments = Arc::new(PaymentProviderClient::new(config));

        let scheduling = SchedulingState::new(Arc::clone(&supabase), cache);
        let settlement = SettlementState::new(
            Arc::clone(&supabase),
            payments,
            config.supabase_service_role_key.clone(),
        );
        let booking = BookingState::new(supabase, &scheduling, &settlement);

        Self { scheduling, booking, settlement }
    }
}

pub fn create_router(cells: &AppCells) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/scheduling", scheduling_routes(cells.scheduling.clone()))
        .nest("/api/appointments", booking_routes(cells.booking.clone()))
        .nest("/api/settlements", settlement_routes(cells.settlement.clone()))
        .nest("/webhooks", webhook_routes(cells.settlement.clone()))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
