use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::SettlementError;

/// Thin client for the external payment provider. The wire protocol is
/// opaque to the core; only the returned references are stored and later
/// correlated with inbound webhook events.
pub struct PaymentProviderClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Clone)]
pub struct ChargeIntent {
    pub payment_ref: String,
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub refund_ref: String,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_ref: String,
}

impl PaymentProviderClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.payment_provider_url.clone(),
            api_key: config.payment_provider_api_key.clone(),
        }
    }

    /// Initiate a charge against the patient. Completion arrives later as a
    /// payment webhook carrying this payment_ref.
    pub async fn create_charge(
        &self,
        amount: f64,
        patient_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<ChargeIntent, SettlementError> {
        let body = json!({
            "amount": amount,
            "currency": "eur",
            "customer_ref": patient_id,
            "metadata": { "appointment_id": appointment_id }
        });

        let response = self.post("/v1/charges", body).await?;
        let payment_ref = Self::extract_ref(&response)?;

        debug!("Charge initiated for appointment {}: {}", appointment_id, payment_ref);
        Ok(ChargeIntent { payment_ref })
    }

    pub async fn create_refund(
        &self,
        charge_ref: &str,
        amount: f64,
    ) -> Result<RefundReceipt, SettlementError> {
        let body = json!({
            "charge_ref": charge_ref,
            "amount": amount
        });

        let response = self.post("/v1/refunds", body).await?;
        let refund_ref = Self::extract_ref(&response)?;

        debug!("Refund issued against charge {}: {}", charge_ref, refund_ref);
        Ok(RefundReceipt { refund_ref })
    }

    /// Transfer a payout to the doctor's payment account.
    pub async fn create_transfer(
        &self,
        account_ref: &str,
        amount: f64,
        settlement_id: Uuid,
    ) -> Result<TransferReceipt, SettlementError> {
        let body = json!({
            "account_ref": account_ref,
            "amount": amount,
            "metadata": { "settlement_id": settlement_id }
        });

        let response = self.post("/v1/transfers", body).await?;
        let transfer_ref = Self::extract_ref(&response)?;

        debug!("Transfer initiated for settlement {}: {}", settlement_id, transfer_ref);
        Ok(TransferReceipt { transfer_ref })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, SettlementError> {
        let url = format!("{}{}", self.base_url, path);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, bearer);
        }

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| SettlementError::PaymentProviderError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Payment provider error ({}): {}", status, error_text);
            return Err(SettlementError::PaymentProviderError(format!(
                "{}: {}",
                status, error_text
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SettlementError::PaymentProviderError(e.to_string()))
    }

    fn extract_ref(response: &Value) -> Result<String, SettlementError> {
        response["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                SettlementError::PaymentProviderError(
                    "Provider response missing id field".to_string(),
                )
            })
    }
}
