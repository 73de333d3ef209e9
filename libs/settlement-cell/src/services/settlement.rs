use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{DoctorPayoutAccount, Settlement, SettlementError, SettlementStatus};
use crate::services::commission::split_price;
use crate::services::payments::PaymentProviderClient;

pub struct SettlementService {
    supabase: Arc<SupabaseClient>,
    payments: Arc<PaymentProviderClient>,
}

impl SettlementService {
    pub fn new(supabase: Arc<SupabaseClient>, payments: Arc<PaymentProviderClient>) -> Self {
        Self { supabase, payments }
    }

    /// Create the settlement row for a freshly booked appointment and initiate
    /// the external charge. The commission percentage is frozen here; later
    /// recalculations must reuse it.
    pub async fn create_for_appointment(
        &self,
        appointment_id: Uuid,
        doctor_id: Uuid,
        patient_id: Uuid,
        price: f64,
        commission_percentage: f64,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        if price <= 0.0 {
            return Err(SettlementError::InvalidInput(
                "Settlements require a positive price".to_string(),
            ));
        }

        let split = split_price(price, commission_percentage);
        let now = Utc::now();

        let settlement_data = json!({
            "appointment_id": appointment_id,
            "doctor_id": doctor_id,
            "price": price,
            "commission_amount": split.commission_amount,
            "commission_percentage_used": commission_percentage,
            "payout_amount": split.payout_amount,
            "patient_paid": false,
            "doctor_paid": false,
            "payout_on_hold": false,
            "status": SettlementStatus::Processing.to_string(),
            "refunded": false,
            "refund_amount": 0.0,
            "manual_reversal_required": false,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let created = self
            .supabase
            .insert_returning("/rest/v1/settlements", Some(auth_token), settlement_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| SettlementError::DatabaseError("Failed to create settlement".to_string()))?;

        let settlement: Settlement = serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))?;

        info!(
            "Settlement {} created for appointment {} ({} = {} commission + {} payout)",
            settlement.id, appointment_id, price, split.commission_amount, split.payout_amount
        );

        // Charge initiation failure is terminal for this settlement; retrying
        // is an operational concern, not something the core loops on.
        match self.payments.create_charge(price, patient_id, appointment_id).await {
            Ok(intent) => {
                let update_data = json!({
                    "payment_ref": intent.payment_ref,
                    "updated_at": Utc::now().to_rfc3339()
                });
                self.patch_by_id(settlement.id, update_data, auth_token).await
            }
            Err(e) => {
                warn!(
                    "Charge initiation failed for settlement {}: {}",
                    settlement.id, e
                );
                let update_data = json!({
                    "status": SettlementStatus::Failed.to_string(),
                    "updated_at": Utc::now().to_rfc3339()
                });
                self.patch_by_id(settlement.id, update_data, auth_token).await
            }
        }
    }

    pub async fn get_by_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Settlement>, SettlementError> {
        let path = format!("/rest/v1/settlements?appointment_id=eq.{}", appointment_id);
        self.fetch_optional(&path, auth_token).await
    }

    pub async fn get_by_payment_ref(
        &self,
        payment_ref: &str,
        auth_token: &str,
    ) -> Result<Option<Settlement>, SettlementError> {
        let path = format!(
            "/rest/v1/settlements?payment_ref=eq.{}",
            urlencoding::encode(payment_ref)
        );
        self.fetch_optional(&path, auth_token).await
    }

    pub async fn get_by_transfer_ref(
        &self,
        transfer_ref: &str,
        auth_token: &str,
    ) -> Result<Option<Settlement>, SettlementError> {
        let path = format!(
            "/rest/v1/settlements?transfer_ref=eq.{}",
            urlencoding::encode(transfer_ref)
        );
        self.fetch_optional(&path, auth_token).await
    }

    /// Inbound payment-succeeded event. Duplicate deliveries are no-ops: the
    /// conditional PATCH only matches while patient_paid is still false.
    pub async fn confirm_payment(
        &self,
        payment_ref: &str,
        charge_ref: &str,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let settlement = self
            .get_by_payment_ref(payment_ref, auth_token)
            .await?
            .ok_or(SettlementError::NotFound)?;

        if settlement.patient_paid && settlement.status == SettlementStatus::Completed {
            debug!(
                "Duplicate payment confirmation for {}, already settled",
                payment_ref
            );
            return Ok(settlement);
        }

        let update_data = json!({
            "patient_paid": true,
            "patient_paid_at": Utc::now().to_rfc3339(),
            "charge_ref": charge_ref,
            "status": SettlementStatus::Completed.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!(
            "/rest/v1/settlements?id=eq.{}&patient_paid=eq.false",
            settlement.id
        );
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        match updated.into_iter().next() {
            Some(row) => {
                info!("Payment confirmed for settlement {}", settlement.id);
                serde_json::from_value(row)
                    .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
            }
            None => {
                debug!("Settlement {} confirmed concurrently", settlement.id);
                Self::fetch_by_id(&self.supabase, settlement.id, auth_token).await
            }
        }
    }

    /// Inbound payment-failed event. A settlement that already completed keeps
    /// its state (out-of-order delivery); anything else becomes failed.
    pub async fn mark_payment_failed(
        &self,
        payment_ref: &str,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let settlement = self
            .get_by_payment_ref(payment_ref, auth_token)
            .await?
            .ok_or(SettlementError::NotFound)?;

        if settlement.status == SettlementStatus::Completed {
            warn!(
                "Ignoring payment failure for {} arriving after confirmation",
                payment_ref
            );
            return Ok(settlement);
        }

        if settlement.status == SettlementStatus::Failed {
            debug!("Duplicate payment failure for {}", payment_ref);
            return Ok(settlement);
        }

        let update_data = json!({
            "status": SettlementStatus::Failed.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        info!("Payment failed for settlement {}", settlement.id);
        self.patch_by_id(settlement.id, update_data, auth_token).await
    }

    pub async fn get_payout_account(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<DoctorPayoutAccount>, SettlementError> {
        let path = format!("/rest/v1/doctor_payout_accounts?doctor_id=eq.{}", doctor_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse payout account: {}", e))),
            None => Ok(None),
        }
    }

    pub(crate) async fn fetch_by_id(
        supabase: &SupabaseClient,
        settlement_id: Uuid,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let path = format!("/rest/v1/settlements?id=eq.{}", settlement_id);

        let result: Vec<Value> = supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(SettlementError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }

    async fn fetch_optional(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<Option<Settlement>, SettlementError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e))),
            None => Ok(None),
        }
    }

    async fn patch_by_id(
        &self,
        settlement_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Settlement, SettlementError> {
        let path = format!("/rest/v1/settlements?id=eq.{}", settlement_id);

        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = updated.into_iter().next().ok_or(SettlementError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse settlement: {}", e)))
    }
}

/// Compute when a settlement's payout becomes due.
pub fn payout_due_at(appointment_starts_at: DateTime<Utc>) -> DateTime<Utc> {
    appointment_starts_at + chrono::Duration::hours(2)
}
