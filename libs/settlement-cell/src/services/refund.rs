use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_database::supabase::SupabaseClient;

use crate::models::{RefundType, Settlement, SettlementError, SettlementStatus};
use crate::services::commission::round2;
use crate::services::payments::PaymentProviderClient;
use crate::services::settlement::SettlementService;

/// Outcome of the tiered cancellation policy for one settlement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefundDecision {
    pub refund_type: RefundType,
    pub patient_refund: f64,
    pub commission_refund: f64,
    pub hours_before_appointment: i64,
}

/// Tier thresholds: >= 24h before the appointment refunds everything, >= 1h
/// refunds half, anything later refunds nothing.
pub fn evaluate(
    price: f64,
    commission: f64,
    appointment_starts_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RefundDecision {
    let hours_before = (appointment_starts_at - now).num_hours();

    if hours_before >= 24 {
        RefundDecision {
            refund_type: RefundType::Full,
            patient_refund: price,
            commission_refund: commission,
            hours_before_appointment: hours_before,
        }
    } else if hours_before >= 1 {
        RefundDecision {
            refund_type: RefundType::Partial,
            patient_refund: round2(price * 0.5),
            commission_refund: round2(commission * 0.5),
            hours_before_appointment: hours_before,
        }
    } else {
        RefundDecision {
            refund_type: RefundType::NoRefund,
            patient_refund: 0.0,
            commission_refund: 0.0,
            hours_before_appointment: hours_before,
        }
    }
}

pub struct RefundService {
    supabase: Arc<SupabaseClient>,
    payments: Arc<PaymentProviderClient>,
}

impl RefundService {
    pub fn new(supabase: Arc<SupabaseClient>, payments: Arc<PaymentProviderClient>) -> Self {
        Self { supabase, payments }
    }

    /// Apply the cancellation policy to a settlement. Idempotent: a settlement
    /// that already carries a refund is returned unchanged.
    pub async fn process_refund(
        &self,
        settlement: &Settlement,
        appointment_starts_at: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        if settlement.refunded {
            warn!("Settlement {} already refunded, skipping", settlement.id);
            return Ok(settlement.clone());
        }

        let decision = evaluate(
            settlement.price,
            settlement.commission_amount,
            appointment_starts_at,
            now,
        );

        info!(
            "Refund decision for settlement {}: {:?} ({}h before appointment)",
            settlement.id, decision.refund_type, decision.hours_before_appointment
        );

        if decision.refund_type == RefundType::NoRefund {
            return self.apply_no_refund(settlement, &decision, reason, auth_token).await;
        }

        // The external refund runs against the original charge. When it fails
        // the settlement is left untouched for operator retry; the
        // cancellation itself must not be rolled back over a provider hiccup.
        let external_refund_ref = if settlement.patient_paid {
            match settlement.charge_ref.as_deref() {
                Some(charge_ref) => {
                    match self.payments.create_refund(charge_ref, decision.patient_refund).await {
                        Ok(receipt) => Some(receipt.refund_ref),
                        Err(e) => {
                            warn!(
                                "External refund failed for settlement {}: {}",
                                settlement.id, e
                            );
                            self.insert_refund_record(settlement, &decision, reason.clone(), None, "failed", auth_token)
                                .await?;
                            return Ok(settlement.clone());
                        }
                    }
                }
                None => {
                    warn!(
                        "Settlement {} is paid but has no charge reference, flagging for review",
                        settlement.id
                    );
                    None
                }
            }
        } else {
            debug!("Settlement {} not yet paid, refund is bookkeeping only", settlement.id);
            None
        };

        let new_status = match decision.refund_type {
            RefundType::Full => SettlementStatus::Refunded,
            RefundType::Partial => SettlementStatus::PartiallyRefunded,
            RefundType::NoRefund => unreachable!("no-refund handled above"),
        };

        // The platform waives its cut back to the doctor.
        let new_payout = round2(settlement.payout_amount + decision.commission_refund);

        let manual_reversal_required =
            settlement.doctor_paid && decision.commission_refund > 0.0;
        if manual_reversal_required {
            warn!(
                "Settlement {} refunded after payout was disbursed, manual reversal required",
                settlement.id
            );
        }

        let update_data = json!({
            "refunded": true,
            "refund_amount": decision.patient_refund,
            "refund_type": decision.refund_type.to_string(),
            "status": new_status.to_string(),
            "payout_amount": new_payout,
            "manual_reversal_required": manual_reversal_required,
            "updated_at": Utc::now().to_rfc3339()
        });

        // Guarded on refunded=false so a concurrent cancellation can only
        // apply the policy once.
        let path = format!(
            "/rest/v1/settlements?id=eq.{}&refunded=eq.false",
            settlement.id
        );
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let Some(row) = updated.into_iter().next() else {
            warn!(
                "Settlement {} was refunded concurrently, returning stored state",
                settlement.id
            );
            return SettlementService::fetch_by_id(&self.supabase, settlement.id, auth_token).await;
        };

        self.insert_refund_record(
            settlement,
            &decision,
            reason,
            external_refund_ref,
            "processed",
            auth_token,
        )
        .await?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }

    /// Inside the no-refund window nothing moves: amounts and status stay put
    /// so the payout sweep still pays the doctor in full.
    async fn apply_no_refund(
        &self,
        settlement: &Settlement,
        decision: &RefundDecision,
        reason: Option<String>,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let update_data = json!({
            "refund_type": RefundType::NoRefund.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/settlements?id=eq.{}", settlement.id);
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        self.insert_refund_record(settlement, decision, reason, None, "not_applicable", auth_token)
            .await?;

        let row = updated
            .into_iter()
            .next()
            .ok_or(SettlementError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }

    async fn insert_refund_record(
        &self,
        settlement: &Settlement,
        decision: &RefundDecision,
        reason: Option<String>,
        external_refund_ref: Option<String>,
        status: &str,
        auth_token: &str,
    ) -> Result<(), SettlementError> {
        let record_data = json!({
            "settlement_id": settlement.id,
            "amount": decision.patient_refund,
            "refund_type": decision.refund_type.to_string(),
            "reason": reason,
            "hours_before_appointment": decision.hours_before_appointment,
            "external_refund_ref": external_refund_ref,
            "status": status,
            "created_at": Utc::now().to_rfc3339()
        });

        let _: Vec<Value> = self
            .supabase
            .insert_returning("/rest/v1/refund_records", Some(auth_token), record_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn cancelling_a_day_ahead_refunds_everything() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 9, 13, 0); // 25h before

        let decision = evaluate(100.0, 5.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::Full);
        assert_eq!(decision.patient_refund, 100.0);
        assert_eq!(decision.commission_refund, 5.0);
        assert_eq!(decision.hours_before_appointment, 25);
    }

    #[test]
    fn cancelling_half_an_hour_before_refunds_nothing() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 10, 13, 30);

        let decision = evaluate(100.0, 5.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::NoRefund);
        assert_eq!(decision.patient_refund, 0.0);
        assert_eq!(decision.commission_refund, 0.0);
    }

    #[test]
    fn cancelling_inside_a_day_refunds_half() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 10, 2, 0); // 12h before

        let decision = evaluate(100.0, 5.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::Partial);
        assert_eq!(decision.patient_refund, 50.0);
        assert_eq!(decision.commission_refund, 2.5);
    }

    #[test]
    fn exactly_24_hours_is_still_a_full_refund() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 9, 14, 0);

        let decision = evaluate(80.0, 4.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::Full);
    }

    #[test]
    fn exactly_one_hour_is_still_a_partial_refund() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 10, 13, 0);

        let decision = evaluate(80.0, 4.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::Partial);
        assert_eq!(decision.patient_refund, 40.0);
    }

    #[test]
    fn just_under_24_hours_drops_to_partial() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 9, 14, 30); // 23.5h before

        let decision = evaluate(80.0, 4.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::Partial);
    }

    #[test]
    fn cancelling_after_the_start_refunds_nothing() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 10, 15, 0);

        let decision = evaluate(80.0, 4.0, starts_at, now);

        assert_eq!(decision.refund_type, RefundType::NoRefund);
    }

    #[test]
    fn partial_refund_amounts_round_to_cents() {
        let starts_at = at(2025, 1, 10, 14, 0);
        let now = at(2025, 1, 10, 2, 0);

        let decision = evaluate(33.34, 2.5, starts_at, now);

        assert_eq!(decision.patient_refund, 16.67);
        assert_eq!(decision.commission_refund, 1.25);
    }
}
