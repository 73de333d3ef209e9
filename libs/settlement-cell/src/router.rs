// libs/settlement-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_database::supabase::SupabaseClient;

use crate::handlers;
use crate::services::commission::PlatformSettingsService;
use crate::services::events::PaymentEventHandler;
use crate::services::payments::PaymentProviderClient;
use crate::services::payout::PayoutService;
use crate::services::refund::RefundService;
use crate::services::settlement::SettlementService;

#[derive(Clone)]
pub struct SettlementState {
    pub settlements: Arc<SettlementService>,
    pub payouts: Arc<PayoutService>,
    pub refunds: Arc<RefundService>,
    pub platform: Arc<PlatformSettingsService>,
    pub events: Arc<PaymentEventHandler>,
    pub service_role_key: String,
}

impl SettlementState {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        payments: Arc<PaymentProviderClient>,
        service_role_key: String,
    ) -> Self {
        let settlements = Arc::new(SettlementService::new(
            Arc::clone(&supabase),
            Arc::clone(&payments),
        ));
        let payouts = Arc::new(PayoutService::new(
            Arc::clone(&supabase),
            Arc::clone(&payments),
            Arc::clone(&settlements),
        ));
        let refunds = Arc::new(RefundService::new(Arc::clone(&supabase), payments));
        let platform = Arc::new(PlatformSettingsService::new(supabase));
        let events = Arc::new(PaymentEventHandler::new(
            Arc::clone(&settlements),
            Arc::clone(&payouts),
        ));

        Self {
            settlements,
            payouts,
            refunds,
            platform,
            events,
            service_role_key,
        }
    }
}

pub fn settlement_routes(state: SettlementState) -> Router {
    Router::new()
        .route(
            "/appointment/{appointment_id}",
            get(handlers::get_settlement_for_appointment),
        )
        .route(
            "/platform-settings",
            get(handlers::get_platform_settings).put(handlers::put_platform_settings),
        )
        .route("/payouts/run", post(handlers::run_payout_sweep))
        .route(
            "/{settlement_id}/release-hold",
            post(handlers::release_payout_hold),
        )
        .with_state(state)
}

/// Inbound provider events get their own router so the API can mount it
/// outside the authenticated /api tree.
pub fn webhook_routes(state: SettlementState) -> Router {
    Router::new()
        .route("/payments", post(handlers::payment_webhook))
        .route("/transfers", post(handlers::transfer_webhook))
        .with_state(state)
}
