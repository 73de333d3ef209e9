use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{PayoutSweepQuery, PayoutSweepReport, Settlement, SettlementError};
use crate::services::payments::PaymentProviderClient;
use crate::services::settlement::{payout_due_at, SettlementService};

pub struct PayoutService {
    supabase: Arc<SupabaseClient>,
    payments: Arc<PaymentProviderClient>,
    settlements: Arc<SettlementService>,
}

impl PayoutService {
    pub fn new(
        supabase: Arc<SupabaseClient>,
        payments: Arc<PaymentProviderClient>,
        settlements: Arc<SettlementService>,
    ) -> Self {
        Self { supabase, payments, settlements }
    }

    /// Stamp the payout due time onto the appointment's settlement. Called on
    /// confirmation; a free appointment simply has no settlement to stamp.
    pub async fn schedule_payout(
        &self,
        appointment_id: Uuid,
        appointment_starts_at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Option<Settlement>, SettlementError> {
        let Some(settlement) = self
            .settlements
            .get_by_appointment(appointment_id, auth_token)
            .await?
        else {
            return Ok(None);
        };

        let due_at = payout_due_at(appointment_starts_at);

        let update_data = json!({
            "payout_scheduled_at": due_at.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/settlements?id=eq.{}", settlement.id);
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = updated.into_iter().next().ok_or(SettlementError::NotFound)?;
        let settlement: Settlement = serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))?;

        info!(
            "Payout for settlement {} scheduled at {}",
            settlement.id, due_at
        );
        Ok(Some(settlement))
    }

    /// Periodic sweep over due settlements. Each row is processed
    /// independently; transfer failures are recorded and skipped so one bad
    /// payout never blocks the batch, and `doctor_paid` guards make re-runs
    /// no-ops.
    pub async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<PayoutSweepReport, SettlementError> {
        let query = PayoutSweepQuery { now };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &query.to_path(), Some(auth_token), None)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let due: Vec<Settlement> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Settlement>, _>>()
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlements: {}", e)))?;

        let mut report = PayoutSweepReport { examined: due.len(), ..Default::default() };

        debug!("Payout sweep examining {} due settlements", due.len());

        for settlement in due {
            match self.process_payout(&settlement, now, auth_token).await {
                Ok(true) => report.paid += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("Payout failed for settlement {}: {}", settlement.id, e);
                    report.failed += 1;

                    let update_data = json!({
                        "payout_error": e.to_string(),
                        "updated_at": Utc::now().to_rfc3339()
                    });
                    let path = format!("/rest/v1/settlements?id=eq.{}", settlement.id);
                    if let Err(record_err) = self
                        .supabase
                        .update_returning(&path, Some(auth_token), update_data)
                        .await
                    {
                        warn!(
                            "Failed to record payout error on settlement {}: {}",
                            settlement.id, record_err
                        );
                    }
                }
            }
        }

        info!(
            "Payout sweep finished: {} examined, {} paid, {} skipped, {} failed",
            report.examined, report.paid, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn process_payout(
        &self,
        settlement: &Settlement,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<bool, SettlementError> {
        if settlement.payout_amount <= 0.0 {
            debug!("Settlement {} has no payout amount, skipping", settlement.id);
            return Ok(false);
        }

        let Some(account) = self
            .settlements
            .get_payout_account(settlement.doctor_id, auth_token)
            .await?
        else {
            warn!(
                "Doctor {} has no payout account, payout for settlement {} delayed",
                settlement.doctor_id, settlement.id
            );
            return Ok(false);
        };

        if !account.is_active {
            warn!(
                "Payout account for doctor {} is inactive, payout for settlement {} delayed",
                settlement.doctor_id, settlement.id
            );
            return Ok(false);
        }

        let receipt = self
            .payments
            .create_transfer(&account.account_ref, settlement.payout_amount, settlement.id)
            .await?;

        let update_data = json!({
            "doctor_paid": true,
            "doctor_paid_at": now.to_rfc3339(),
            "transfer_ref": receipt.transfer_ref,
            "payout_error": Value::Null,
            "updated_at": Utc::now().to_rfc3339()
        });

        // Guarded on doctor_paid=false: if another sweep instance won the
        // race after our select, this PATCH matches nothing.
        let path = format!(
            "/rest/v1/settlements?id=eq.{}&doctor_paid=eq.false",
            settlement.id
        );
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            warn!(
                "Settlement {} was paid out concurrently after transfer {}, flagging for review",
                settlement.id, receipt.transfer_ref
            );
            return Ok(false);
        }

        info!(
            "Payout of {} transferred to doctor {} for settlement {} ({})",
            settlement.payout_amount, settlement.doctor_id, settlement.id, receipt.transfer_ref
        );
        Ok(true)
    }

    /// Inbound transfer-completed event, for providers that settle transfers
    /// asynchronously. A no-op when the sweep already recorded the payout.
    pub async fn confirm_payout(
        &self,
        transfer_ref: &str,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let settlement = self
            .settlements
            .get_by_transfer_ref(transfer_ref, auth_token)
            .await?
            .ok_or(SettlementError::NotFound)?;

        if settlement.doctor_paid {
            debug!("Duplicate transfer confirmation for {}", transfer_ref);
            return Ok(settlement);
        }

        let update_data = json!({
            "doctor_paid": true,
            "doctor_paid_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!(
            "/rest/v1/settlements?id=eq.{}&doctor_paid=eq.false",
            settlement.id
        );
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        match updated.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e))),
            None => SettlementService::fetch_by_id(&self.supabase, settlement.id, auth_token).await,
        }
    }

    /// Inbound transfer reversal/failure. Clears the paid marker and parks the
    /// settlement on hold so the sweep does not auto-retry; retrying a
    /// reversed transfer is an operator decision.
    pub async fn mark_payout_reversed(
        &self,
        transfer_ref: &str,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let settlement = self
            .settlements
            .get_by_transfer_ref(transfer_ref, auth_token)
            .await?
            .ok_or(SettlementError::NotFound)?;

        if !settlement.doctor_paid && settlement.payout_on_hold {
            debug!("Duplicate transfer reversal for {}", transfer_ref);
            return Ok(settlement);
        }

        warn!(
            "Transfer {} reversed, settlement {} parked for manual retry",
            transfer_ref, settlement.id
        );

        let update_data = json!({
            "doctor_paid": false,
            "doctor_paid_at": Value::Null,
            "payout_on_hold": true,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/settlements?id=eq.{}", settlement.id);
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = updated.into_iter().next().ok_or(SettlementError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }

    /// Operator action: make a reversed payout eligible for the sweep again.
    pub async fn release_payout_hold(
        &self,
        settlement_id: Uuid,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let update_data = json!({
            "payout_on_hold": false,
            "transfer_ref": Value::Null,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/settlements?id=eq.{}", settlement_id);
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = updated.into_iter().next().ok_or(SettlementError::NotFound)?;

        info!("Payout hold released for settlement {}", settlement_id);

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }
}
