use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use shared_database::supabase::SupabaseClient;

use crate::models::{PlatformSettings, SettlementError, UpdatePlatformSettingsRequest};

/// Fallback used until the platform settings row exists.
pub const DEFAULT_COMMISSION_PERCENTAGE: f64 = 5.0;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommissionSplit {
    pub commission_amount: f64,
    pub payout_amount: f64,
}

/// Split an appointment price into platform commission and doctor payout.
/// Callers must pass the percentage that was in force when the settlement was
/// created, never a freshly-read platform rate.
pub fn split_price(price: f64, percentage: f64) -> CommissionSplit {
    let commission_amount = round2(price * percentage / 100.0);
    let payout_amount = round2(price - commission_amount);

    CommissionSplit { commission_amount, payout_amount }
}

/// Singleton platform configuration, lazily initialised on first read.
pub struct PlatformSettingsService {
    supabase: Arc<SupabaseClient>,
}

impl PlatformSettingsService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get_or_init(&self, auth_token: &str) -> Result<PlatformSettings, SettlementError> {
        let path = "/rest/v1/platform_settings?order=created_at.asc&limit=1";

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        if let Some(row) = result.into_iter().next() {
            return serde_json::from_value(row)
                .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse platform settings: {}", e)));
        }

        info!(
            "No platform settings found, initialising with default commission {}%",
            DEFAULT_COMMISSION_PERCENTAGE
        );

        let now = Utc::now();
        let settings_data = json!({
            "commission_percentage": DEFAULT_COMMISSION_PERCENTAGE,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let created = self
            .supabase
            .insert_returning("/rest/v1/platform_settings", Some(auth_token), settings_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| SettlementError::DatabaseError("Failed to initialise platform settings".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse platform settings: {}", e)))
    }

    pub async fn get_commission_percentage(&self, auth_token: &str) -> Result<f64, SettlementError> {
        let settings = self.get_or_init(auth_token).await?;
        debug!("Platform commission percentage: {}", settings.commission_percentage);
        Ok(settings.commission_percentage)
    }

    pub async fn update(
        &self,
        request: UpdatePlatformSettingsRequest,
        auth_token: &str,
    ) -> Result<PlatformSettings, SettlementError> {
        if !(0.0..=100.0).contains(&request.commission_percentage) {
            return Err(SettlementError::InvalidInput(
                "Commission percentage must be between 0 and 100".to_string(),
            ));
        }

        let current = self.get_or_init(auth_token).await?;

        let path = format!("/rest/v1/platform_settings?id=eq.{}", current.id);
        let update_data = json!({
            "commission_percentage": request.commission_percentage,
            "updated_at": Utc::now().to_rfc3339()
        });

        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| SettlementError::DatabaseError(e.to_string()))?;

        let row = updated
            .into_iter()
            .next()
            .ok_or_else(|| SettlementError::DatabaseError("Failed to update platform settings".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| SettlementError::DatabaseError(format!("Failed to parse platform settings: {}", e)))
    }
}
