// libs/settlement-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// SETTLEMENT MODELS
// ==============================================================================

/// The commission/payout/refund record tied 1:1 to a priced appointment.
/// Invariant while unrefunded: `commission_amount + payout_amount == price`
/// (within rounding); after a refund `payout_amount` additionally carries the
/// waived commission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub price: f64,
    pub commission_amount: f64,
    pub commission_percentage_used: f64,
    pub payout_amount: f64,
    pub patient_paid: bool,
    pub patient_paid_at: Option<DateTime<Utc>>,
    pub doctor_paid: bool,
    pub doctor_paid_at: Option<DateTime<Utc>>,
    pub payout_scheduled_at: Option<DateTime<Utc>>,
    pub payout_on_hold: bool,
    pub status: SettlementStatus,
    pub refunded: bool,
    pub refund_amount: f64,
    pub refund_type: Option<RefundType>,
    pub manual_reversal_required: bool,
    pub payment_ref: Option<String>,
    pub charge_ref: Option<String>,
    pub transfer_ref: Option<String>,
    pub payout_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Processing => write!(f, "processing"),
            SettlementStatus::Completed => write!(f, "completed"),
            SettlementStatus::Failed => write!(f, "failed"),
            SettlementStatus::Refunded => write!(f, "refunded"),
            SettlementStatus::PartiallyRefunded => write!(f, "partially_refunded"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    Full,
    Partial,
    NoRefund,
}

impl fmt::Display for RefundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundType::Full => write!(f, "full"),
            RefundType::Partial => write!(f, "partial"),
            RefundType::NoRefund => write!(f, "no_refund"),
        }
    }
}

/// Append-only audit row, one per cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub id: Uuid,
    pub settlement_id: Uuid,
    pub amount: f64,
    pub refund_type: RefundType,
    pub reason: Option<String>,
    pub hours_before_appointment: i64,
    pub external_refund_ref: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub id: Uuid,
    pub commission_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorPayoutAccount {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub account_ref: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST / EVENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePlatformSettingsRequest {
    pub commission_percentage: f64,
}

/// Inbound payment-provider events, keyed by the provider's references.
/// Delivery is at-least-once; handlers must treat duplicates as no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentSucceeded { payment_ref: String, charge_ref: String },
    PaymentFailed { payment_ref: String },
    TransferCompleted { transfer_ref: String },
    TransferReversed { transfer_ref: String },
    TransferFailed { transfer_ref: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutSweepReport {
    pub examined: usize,
    pub paid: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ==============================================================================
// TYPED STORE QUERIES
// ==============================================================================

/// Sweep selection: paid by the patient, not yet paid out, not held back, due,
/// and in a status that still owes the doctor money. `doctor_paid` doubles as
/// the idempotency marker, so a re-run never reselects a settled row.
#[derive(Debug, Clone)]
pub struct PayoutSweepQuery {
    pub now: DateTime<Utc>,
}

impl PayoutSweepQuery {
    pub fn to_path(&self) -> String {
        let due = urlencoding::encode(&self.now.to_rfc3339()).into_owned();
        format!(
            "/rest/v1/settlements?patient_paid=eq.true&doctor_paid=eq.false&payout_on_hold=eq.false&status=in.(completed,partially_refunded)&payout_scheduled_at=lte.{}&order=payout_scheduled_at.asc",
            due
        )
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    #[error("Settlement not found")]
    NotFound,

    #[error("Invalid settlement input: {0}")]
    InvalidInput(String),

    #[error("Payment provider error: {0}")]
    PaymentProviderError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::NotFound => AppError::NotFound("Settlement not found".to_string()),
            SettlementError::InvalidInput(msg) => AppError::BadRequest(msg),
            SettlementError::PaymentProviderError(msg) => AppError::ExternalService(msg),
            SettlementError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
