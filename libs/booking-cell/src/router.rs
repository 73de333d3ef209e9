// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use scheduling_cell::router::SchedulingState;
use settlement_cell::router::SettlementState;
use shared_database::supabase::SupabaseClient;

use crate::handlers;
use crate::services::booking::BookingService;

#[derive(Clone)]
pub struct BookingState {
    pub booking: Arc<BookingService>,
}

impl BookingState {
    /// Wire the booking pipeline from the neighbouring cells' services. All
    /// handles are created once at startup; nothing is constructed per
    /// request.
    pub fn new(
        supabase: Arc<SupabaseClient>,
        scheduling: &SchedulingState,
        settlement: &SettlementState,
    ) -> Self {
        let booking = Arc::new(BookingService::new(
            supabase,
            Arc::clone(&scheduling.schedule),
            Arc::clone(&scheduling.slots),
            Arc::clone(&settlement.settlements),
            Arc::clone(&settlement.refunds),
            Arc::clone(&settlement.payouts),
            Arc::clone(&settlement.platform),
        ));

        Self { booking }
    }
}

pub fn booking_routes(state: BookingState) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/search", get(handlers::search_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .with_state(state)
}
