// libs/booking-cell/src/services/transaction.rs
//
// Store-backed serialisation for the booking commit section. The pre-check in
// the booking pipeline is advisory; only the overlap re-check performed while
// holding the slot lock actually guarantees no double booking, so the lock
// covers the whole provider-day rather than a single interval.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentStatus, BookingError};

pub struct BookingTransactionService {
    supabase: Arc<SupabaseClient>,
    lock_timeout_seconds: i64,
}

impl BookingTransactionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lock_timeout_seconds: 30,
        }
    }

    /// Acquire the per-doctor-per-day slot lock. The `slot_locks.lock_key`
    /// unique index makes the insert the arbitration point: exactly one
    /// concurrent caller wins. A held lock reads as a slot conflict so the
    /// caller retries against fresh availability.
    pub async fn acquire_slot_lock(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<String, BookingError> {
        let lock_key = format!("slot_{}_{}", doctor_id, date);

        if self.try_insert_lock(&lock_key, doctor_id).await {
            debug!("Slot lock acquired: {}", lock_key);
            return Ok(lock_key);
        }

        // The lock row exists; a crashed writer may have left it behind.
        if self.reap_expired_lock(&lock_key).await? && self.try_insert_lock(&lock_key, doctor_id).await {
            debug!("Slot lock acquired after reaping expired lock: {}", lock_key);
            return Ok(lock_key);
        }

        warn!("Slot lock contention on {}", lock_key);
        Err(BookingError::SlotConflict)
    }

    pub async fn release_slot_lock(&self, lock_key: &str) {
        let path = format!("/rest/v1/slot_locks?lock_key=eq.{}", lock_key);

        if let Err(e) = self.supabase.delete(&path, None).await {
            // The expiry reaper will pick it up; booking already finished.
            warn!("Failed to release slot lock {}: {}", lock_key, e);
        } else {
            debug!("Slot lock released: {}", lock_key);
        }
    }

    async fn try_insert_lock(&self, lock_key: &str, doctor_id: Uuid) -> bool {
        let now = Utc::now();
        let lock_data = json!({
            "lock_key": lock_key,
            "doctor_id": doctor_id,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(self.lock_timeout_seconds)).to_rfc3339(),
            "process_id": format!("booking_{}", Uuid::new_v4())
        });

        self.supabase
            .insert_returning("/rest/v1/slot_locks", None, lock_data)
            .await
            .map(|rows| !rows.is_empty())
            .unwrap_or(false)
    }

    async fn reap_expired_lock(&self, lock_key: &str) -> Result<bool, BookingError> {
        let path = format!("/rest/v1/slot_locks?lock_key=eq.{}", lock_key);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let Some(lock) = result.first() else {
            // Holder released between our insert attempt and this read.
            return Ok(true);
        };

        let expired = lock
            .get("expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|expires_at| expires_at.with_timezone(&Utc) < Utc::now())
            .unwrap_or(false);

        if !expired {
            return Ok(false);
        }

        warn!("Reaping expired slot lock {}", lock_key);
        self.supabase
            .delete(&path, None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        Ok(true)
    }

    pub async fn insert_appointment(
        &self,
        appointment_data: Value,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let created = self
            .supabase
            .insert_returning("/rest/v1/appointments", Some(auth_token), appointment_data)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| BookingError::DatabaseError("Failed to create appointment".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    /// Compensation for a failed settlement insert: the appointment row is
    /// removed while the slot lock is still held, so the pair stays atomic
    /// from any other caller's point of view.
    pub async fn delete_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        self.supabase
            .delete(&path, Some(auth_token))
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))
    }

    /// Compare-and-set update: the PATCH only matches while the row still has
    /// the expected status, so concurrent transitions lose instead of silently
    /// overwriting each other. `None` means the guard did not match.
    pub async fn update_appointment_guarded(
        &self,
        appointment_id: Uuid,
        expected_status: &AppointmentStatus,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Option<Appointment>, BookingError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, expected_status
        );

        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), update_data)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        match updated.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e))),
            None => Ok(None),
        }
    }
}
