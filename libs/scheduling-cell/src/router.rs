// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{routing::get, Router};

use cache_cell::ReadCacheService;
use shared_database::supabase::SupabaseClient;

use crate::handlers;
use crate::services::schedule::ScheduleService;
use crate::services::slots::SlotCalculatorService;

#[derive(Clone)]
pub struct SchedulingState {
    pub schedule: Arc<ScheduleService>,
    pub slots: Arc<SlotCalculatorService>,
    pub cache: Arc<ReadCacheService>,
}

impl SchedulingState {
    pub fn new(supabase: Arc<SupabaseClient>, cache: Arc<ReadCacheService>) -> Self {
        let schedule = Arc::new(ScheduleService::new(Arc::clone(&supabase)));
        let slots = Arc::new(SlotCalculatorService::new(supabase, Arc::clone(&schedule)));

        Self { schedule, slots, cache }
    }
}

pub fn scheduling_routes(state: SchedulingState) -> Router {
    Router::new()
        .route("/doctors/{doctor_id}/slots", get(handlers::get_available_slots))
        .route(
            "/doctors/{doctor_id}/working-hours",
            get(handlers::get_working_hours).put(handlers::put_working_hours),
        )
        .route(
            "/doctors/{doctor_id}/booking-rules",
            get(handlers::get_booking_rules).put(handlers::put_booking_rules),
        )
        .route(
            "/appointment-types",
            get(handlers::list_appointment_types).post(handlers::create_appointment_type),
        )
        .with_state(state)
}
