use std::sync::Arc;

use tracing::info;

use crate::models::{PaymentEvent, SettlementError};
use crate::services::payout::PayoutService;
use crate::services::settlement::SettlementService;

/// Dispatcher for inbound payment-provider events. Each arm delegates to an
/// idempotent handler keyed by the provider's reference, so at-least-once
/// delivery and reordering are safe.
pub struct PaymentEventHandler {
    settlements: Arc<SettlementService>,
    payouts: Arc<PayoutService>,
}

impl PaymentEventHandler {
    pub fn new(settlements: Arc<SettlementService>, payouts: Arc<PayoutService>) -> Self {
        Self { settlements, payouts }
    }

    pub async fn handle(&self, event: PaymentEvent, auth_token: &str) -> Result<(), SettlementError> {
        info!("Dispatching payment event: {:?}", event);

        match event {
            PaymentEvent::PaymentSucceeded { payment_ref, charge_ref } => {
                self.settlements
                    .confirm_payment(&payment_ref, &charge_ref, auth_token)
                    .await?;
            }
            PaymentEvent::PaymentFailed { payment_ref } => {
                self.settlements
                    .mark_payment_failed(&payment_ref, auth_token)
                    .await?;
            }
            PaymentEvent::TransferCompleted { transfer_ref } => {
                self.payouts.confirm_payout(&transfer_ref, auth_token).await?;
            }
            PaymentEvent::TransferReversed { transfer_ref }
            | PaymentEvent::TransferFailed { transfer_ref } => {
                self.payouts
                    .mark_payout_reversed(&transfer_ref, auth_token)
                    .await?;
            }
        }

        Ok(())
    }
}
