// libs/booking-cell/src/services/booking.rs
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use scheduling_cell::models::{day_of_week, DoctorBookingRules, SchedulingError};
use scheduling_cell::services::schedule::ScheduleService;
use scheduling_cell::services::slots::SlotCalculatorService;
use settlement_cell::models::SettlementStatus;
use settlement_cell::services::commission::PlatformSettingsService;
use settlement_cell::services::payout::PayoutService;
use settlement_cell::services::refund::RefundService;
use settlement_cell::services::settlement::SettlementService;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest, BookingError,
    CancelAppointmentRequest, RescheduleAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::transaction::BookingTransactionService;

pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    schedule: Arc<ScheduleService>,
    slots: Arc<SlotCalculatorService>,
    settlements: Arc<SettlementService>,
    refunds: Arc<RefundService>,
    payouts: Arc<PayoutService>,
    platform: Arc<PlatformSettingsService>,
    conflict: ConflictDetectionService,
    lifecycle: AppointmentLifecycleService,
    transaction: BookingTransactionService,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supabase: Arc<SupabaseClient>,
        schedule: Arc<ScheduleService>,
        slots: Arc<SlotCalculatorService>,
        settlements: Arc<SettlementService>,
        refunds: Arc<RefundService>,
        payouts: Arc<PayoutService>,
        platform: Arc<PlatformSettingsService>,
    ) -> Self {
        let conflict = ConflictDetectionService::new(Arc::clone(&supabase));
        let lifecycle = AppointmentLifecycleService::new();
        let transaction = BookingTransactionService::new(Arc::clone(&supabase));

        Self {
            supabase,
            schedule,
            slots,
            settlements,
            refunds,
            payouts,
            platform,
            conflict,
            lifecycle,
            transaction,
        }
    }

    /// Book an appointment. Validation and the slot pre-check run first; the
    /// overlap test is then repeated under the slot lock, which is the actual
    /// double-booking guarantee. The pre-check alone is racy.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        info!(
            "Booking appointment for patient {} with doctor {} on {} {}",
            request.patient_id, request.doctor_id, request.date, request.time
        );

        let start_time = parse_appointment_time(&request.time)?;
        let starts_at = request.date.and_time(start_time).and_utc();
        let now = Utc::now();

        let rules = self
            .schedule
            .get_booking_rules(request.doctor_id, auth_token)
            .await?;
        validate_advance_window(
            starts_at,
            now,
            rules.booking_advance_days_max,
            rules.min_booking_hours_ahead,
        )?;

        let (duration_minutes, price, requires_payment) =
            self.resolve_type_and_price(&request, &rules, auth_token).await?;

        if duration_minutes <= 0 {
            return Err(BookingError::InvalidDuration);
        }

        let Some(working) = self
            .schedule
            .get_working_day(request.doctor_id, day_of_week(request.date), auth_token)
            .await?
        else {
            return Err(BookingError::DoctorNotWorking);
        };

        if !fits_working_window(start_time, duration_minutes, working.start_time, working.end_time) {
            return Err(BookingError::ExceedsWorkingHours);
        }

        let open_slots = self
            .slots
            .get_available_slots(request.doctor_id, request.date, Some(duration_minutes), auth_token)
            .await?;
        if !open_slots.contains(&start_time) {
            return Err(BookingError::SlotNotAvailable);
        }

        let lock_key = self
            .transaction
            .acquire_slot_lock(request.doctor_id, request.date)
            .await?;

        let result = self
            .commit_booking(&request, start_time, duration_minutes, price, requires_payment, auth_token)
            .await;

        self.transaction.release_slot_lock(&lock_key).await;

        result
    }

    // The commit section. Everything here runs while holding the slot lock
    // for the doctor-day, so the re-fetched appointment set cannot change
    // between the overlap re-check and the insert.
    async fn commit_booking(
        &self,
        request: &BookAppointmentRequest,
        start_time: NaiveTime,
        duration_minutes: i32,
        price: f64,
        requires_payment: bool,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let day_appointments = self
            .conflict
            .get_day_appointments(request.doctor_id, request.date, None, auth_token)
            .await?;

        if let Some(existing) = self
            .conflict
            .find_conflict(&day_appointments, start_time, duration_minutes)
        {
            warn!(
                "Booking lost the race for doctor {} on {} {}: conflicts with {}",
                request.doctor_id, request.date, start_time, existing.id
            );
            return Err(BookingError::SlotConflict);
        }

        let now = Utc::now();
        let appointment_data = json!({
            "doctor_id": request.doctor_id,
            "patient_id": request.patient_id,
            "appointment_date": request.date,
            "start_time": start_time.format("%H:%M:%S").to_string(),
            "duration_minutes": duration_minutes,
            "status": AppointmentStatus::Pending.to_string(),
            "reason": request.reason,
            "notes": request.notes,
            "appointment_type_id": request.appointment_type_id,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let appointment = self
            .transaction
            .insert_appointment(appointment_data, auth_token)
            .await?;

        if requires_payment && price > 0.0 {
            let percentage = self.platform.get_commission_percentage(auth_token).await?;

            if let Err(e) = self
                .settlements
                .create_for_appointment(
                    appointment.id,
                    appointment.doctor_id,
                    appointment.patient_id,
                    price,
                    percentage,
                    auth_token,
                )
                .await
            {
                warn!(
                    "Settlement creation failed for appointment {}, rolling the booking back: {}",
                    appointment.id, e
                );
                self.transaction
                    .delete_appointment(appointment.id, auth_token)
                    .await?;
                return Err(e.into());
            }
        }

        info!("Appointment {} booked, awaiting confirmation", appointment.id);
        Ok(appointment)
    }

    /// Move an appointment to a new date/time. The full booking rule set is
    /// re-applied, the appointment's own row is excluded from the overlap
    /// tests, and a successful move goes back to pending for re-confirmation.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if !self.lifecycle.can_reschedule(&appointment.status) {
            return Err(BookingError::InvalidStatusTransition {
                from: appointment.status,
                to: AppointmentStatus::Pending,
            });
        }

        let start_time = parse_appointment_time(&request.new_time)?;
        let starts_at = request.new_date.and_time(start_time).and_utc();
        let now = Utc::now();

        let rules = self
            .schedule
            .get_booking_rules(appointment.doctor_id, auth_token)
            .await?;
        validate_advance_window(
            starts_at,
            now,
            rules.booking_advance_days_max,
            rules.min_booking_hours_ahead,
        )?;

        let duration_minutes = appointment.duration_minutes;

        let Some(working) = self
            .schedule
            .get_working_day(appointment.doctor_id, day_of_week(request.new_date), auth_token)
            .await?
        else {
            return Err(BookingError::DoctorNotWorking);
        };

        if !fits_working_window(start_time, duration_minutes, working.start_time, working.end_time) {
            return Err(BookingError::ExceedsWorkingHours);
        }

        let open_slots = self
            .slots
            .get_available_slots_excluding(
                appointment.doctor_id,
                request.new_date,
                Some(duration_minutes),
                Some(appointment.id),
                auth_token,
            )
            .await?;
        if !open_slots.contains(&start_time) {
            return Err(BookingError::SlotNotAvailable);
        }

        let lock_key = self
            .transaction
            .acquire_slot_lock(appointment.doctor_id, request.new_date)
            .await?;

        let result = self
            .commit_reschedule(&appointment, &request, start_time, auth_token)
            .await;

        self.transaction.release_slot_lock(&lock_key).await;

        result
    }

    async fn commit_reschedule(
        &self,
        appointment: &Appointment,
        request: &RescheduleAppointmentRequest,
        start_time: NaiveTime,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let day_appointments = self
            .conflict
            .get_day_appointments(
                appointment.doctor_id,
                request.new_date,
                Some(appointment.id),
                auth_token,
            )
            .await?;

        if self
            .conflict
            .find_conflict(&day_appointments, start_time, appointment.duration_minutes)
            .is_some()
        {
            return Err(BookingError::SlotConflict);
        }

        let update_data = json!({
            "appointment_date": request.new_date,
            "start_time": start_time.format("%H:%M:%S").to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let updated = self
            .transaction
            .update_appointment_guarded(appointment.id, &appointment.status, update_data, auth_token)
            .await?
            .ok_or_else(|| {
                warn!(
                    "Appointment {} changed status while rescheduling",
                    appointment.id
                );
                BookingError::InvalidStatusTransition {
                    from: appointment.status,
                    to: AppointmentStatus::Pending,
                }
            })?;

        info!(
            "Appointment {} rescheduled to {} {}, back to pending",
            updated.id, updated.appointment_date, updated.start_time
        );
        Ok(updated)
    }

    /// Drive the appointment state machine. Confirmation is payment-gated when
    /// a settlement exists; cancellation routes through the refund policy.
    pub async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle
            .validate_status_transition(&appointment.status, &new_status)?;

        if new_status == AppointmentStatus::Cancelled {
            return self.cancel_validated(appointment, None, auth_token).await;
        }

        if new_status == AppointmentStatus::Confirmed {
            self.enforce_payment_gate(&appointment, auth_token).await?;
        }

        let update_data = json!({
            "status": new_status.to_string(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let updated = self
            .transaction
            .update_appointment_guarded(appointment.id, &appointment.status, update_data, auth_token)
            .await?
            .ok_or(BookingError::InvalidStatusTransition {
                from: appointment.status,
                to: new_status,
            })?;

        if new_status == AppointmentStatus::Confirmed {
            // Payout falls due two hours after the visit starts. A scheduling
            // hiccup here must not unwind the confirmation.
            if let Err(e) = self
                .payouts
                .schedule_payout(updated.id, updated.starts_at(), auth_token)
                .await
            {
                warn!("Failed to schedule payout for appointment {}: {}", updated.id, e);
            }
        }

        info!("Appointment {} moved to {}", updated.id, updated.status);
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle
            .validate_status_transition(&appointment.status, &AppointmentStatus::Cancelled)?;

        self.cancel_validated(appointment, request.reason, auth_token).await
    }

    async fn cancel_validated(
        &self,
        appointment: Appointment,
        reason: Option<String>,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(AppointmentStatus::Cancelled.to_string()));
        if let Some(reason) = &reason {
            update_data.insert("reason".to_string(), json!(reason));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let cancelled = self
            .transaction
            .update_appointment_guarded(
                appointment.id,
                &appointment.status,
                Value::Object(update_data),
                auth_token,
            )
            .await?
            .ok_or(BookingError::InvalidStatusTransition {
                from: appointment.status,
                to: AppointmentStatus::Cancelled,
            })?;

        if let Some(settlement) = self
            .settlements
            .get_by_appointment(cancelled.id, auth_token)
            .await?
        {
            self.refunds
                .process_refund(
                    &settlement,
                    cancelled.starts_at(),
                    reason,
                    Utc::now(),
                    auth_token,
                )
                .await?;
        }

        info!("Appointment {} cancelled", cancelled.id);
        Ok(cancelled)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(BookingError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &query.to_path(), Some(auth_token), None)
            .await
            .map_err(|e| BookingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| BookingError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    /// Confirmation gate: a priced appointment confirms only after its payment
    /// settled. A missing or inactive payout account merely delays the payout
    /// and never blocks confirmation.
    async fn enforce_payment_gate(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<(), BookingError> {
        let Some(settlement) = self
            .settlements
            .get_by_appointment(appointment.id, auth_token)
            .await?
        else {
            return Ok(());
        };

        if !settlement.patient_paid {
            return Err(BookingError::PaymentNotProcessed);
        }
        if settlement.status != SettlementStatus::Completed {
            return Err(BookingError::PaymentNotCompleted);
        }

        match self
            .settlements
            .get_payout_account(appointment.doctor_id, auth_token)
            .await?
        {
            Some(account) if account.is_active => {}
            _ => warn!(
                "Doctor {} has no active payout account; confirming anyway, payout will wait",
                appointment.doctor_id
            ),
        }

        Ok(())
    }

    async fn resolve_type_and_price(
        &self,
        request: &BookAppointmentRequest,
        rules: &DoctorBookingRules,
        auth_token: &str,
    ) -> Result<(i32, f64, bool), BookingError> {
        match request.appointment_type_id {
            Some(type_id) => {
                let appointment_type = match self.schedule.get_appointment_type(type_id, auth_token).await {
                    Ok(t) => t,
                    Err(SchedulingError::NotFound) => return Err(BookingError::AppointmentTypeNotFound),
                    Err(e) => return Err(e.into()),
                };

                let duration = request
                    .duration_minutes
                    .unwrap_or(appointment_type.duration_minutes);

                Ok((duration, appointment_type.price, appointment_type.requires_payment))
            }
            None => {
                let duration = request
                    .duration_minutes
                    .unwrap_or(rules.slot_duration_minutes);

                Ok((duration, 0.0, false))
            }
        }
    }
}

// ==============================================================================
// VALIDATION HELPERS
// ==============================================================================

static TIME_FORMAT: OnceLock<Regex> = OnceLock::new();

/// 24-hour `HH:MM` gate for booking input.
pub fn parse_appointment_time(value: &str) -> Result<NaiveTime, BookingError> {
    let re = TIME_FORMAT
        .get_or_init(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").unwrap());

    if !re.is_match(value) {
        return Err(BookingError::InvalidTimeFormat(value.to_string()));
    }

    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| BookingError::InvalidTimeFormat(value.to_string()))
}

/// The appointment must lie in the future, within the doctor's advance-booking
/// window, and far enough out to satisfy the minimum lead time.
pub fn validate_advance_window(
    starts_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_advance_days: i64,
    min_lead_hours: i64,
) -> Result<(), BookingError> {
    if starts_at <= now {
        return Err(BookingError::AppointmentInPast);
    }

    let lead = starts_at - now;

    if lead.num_days() > max_advance_days {
        return Err(BookingError::BookingTooFarAdvance { max_days: max_advance_days });
    }

    if lead.num_hours() < min_lead_hours {
        return Err(BookingError::BookingTooSoon { min_hours: min_lead_hours });
    }

    Ok(())
}

/// `[start, start + duration)` must sit inside the working-hours window.
pub fn fits_working_window(
    start_time: NaiveTime,
    duration_minutes: i32,
    window_start: NaiveTime,
    window_end: NaiveTime,
) -> bool {
    let minutes = |t: NaiveTime| (t.hour() * 60 + t.minute()) as i32;

    let start = minutes(start_time);
    start >= minutes(window_start) && start + duration_minutes <= minutes(window_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn accepts_valid_24_hour_times() {
        assert_eq!(parse_appointment_time("00:00").unwrap(), t(0, 0));
        assert_eq!(parse_appointment_time("09:30").unwrap(), t(9, 30));
        assert_eq!(parse_appointment_time("23:59").unwrap(), t(23, 59));
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["24:00", "9:30", "12:60", "noon", "12-30", "12:3", ""] {
            assert_matches!(
                parse_appointment_time(bad),
                Err(BookingError::InvalidTimeFormat(_)),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn past_appointments_are_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert_matches!(
            validate_advance_window(now - Duration::hours(1), now, 90, 2),
            Err(BookingError::AppointmentInPast)
        );
        assert_matches!(
            validate_advance_window(now, now, 90, 2),
            Err(BookingError::AppointmentInPast)
        );
    }

    #[test]
    fn bookings_beyond_the_advance_window_are_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let starts_at = now + Duration::days(91);

        assert_matches!(
            validate_advance_window(starts_at, now, 90, 2),
            Err(BookingError::BookingTooFarAdvance { max_days: 90 })
        );
    }

    #[test]
    fn bookings_inside_the_lead_time_are_rejected() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let starts_at = now + Duration::minutes(90);

        assert_matches!(
            validate_advance_window(starts_at, now, 90, 2),
            Err(BookingError::BookingTooSoon { min_hours: 2 })
        );
    }

    #[test]
    fn booking_inside_the_window_passes() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert!(validate_advance_window(now + Duration::hours(3), now, 90, 2).is_ok());
        assert!(validate_advance_window(now + Duration::days(90), now, 90, 2).is_ok());
    }

    #[test]
    fn working_window_containment() {
        assert!(fits_working_window(t(9, 0), 30, t(9, 0), t(12, 0)));
        assert!(fits_working_window(t(11, 30), 30, t(9, 0), t(12, 0)));
        assert!(!fits_working_window(t(11, 45), 30, t(9, 0), t(12, 0)));
        assert!(!fits_working_window(t(8, 30), 30, t(9, 0), t(12, 0)));
        assert!(!fits_working_window(t(12, 0), 30, t(9, 0), t(12, 0)));
    }
}
