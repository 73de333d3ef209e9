// libs/booking-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Timelike};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use scheduling_cell::models::DayAppointmentsQuery;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, BookingError};

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// All non-cancelled appointments for the doctor on one date. This is the
    /// fetch the commit section re-runs under the slot lock.
    pub async fn get_day_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let query = DayAppointmentsQuery {
            doctor_id,
            date,
            exclude_appointment_id,
        };

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

    /// Half-open interval test of the requested slot against the day's
    /// bookings.
    pub fn find_conflict<'a>(
        &self,
        appointments: &'a [Appointment],
        start_time: NaiveTime,
        duration_minutes: i32,
    ) -> Option<&'a Appointment> {
        let requested_start = minutes_from_midnight(start_time);
        let requested_end = requested_start + duration_minutes;

        let conflict = appointments.iter().find(|appointment| {
            let booked_start = minutes_from_midnight(appointment.start_time);
            let booked_end = booked_start + appointment.duration_minutes;

            requested_start < booked_end && booked_start < requested_end
        });

        if let Some(appointment) = conflict {
            debug!(
                "Requested interval {}+{}min conflicts with appointment {}",
                start_time, duration_minutes, appointment.id
            );
        }

        conflict
    }
}

fn minutes_from_midnight(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn appointment(start: NaiveTime, duration_minutes: i32) -> Appointment {
        use crate::models::AppointmentStatus;
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            appointment_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            start_time: start,
            duration_minutes,
            status: AppointmentStatus::Pending,
            reason: None,
            notes: None,
            appointment_type_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service() -> ConflictDetectionService {
        let config = shared_config::AppConfig {
            supabase_url: "http://localhost".to_string(),
            supabase_anon_key: "test".to_string(),
            supabase_service_role_key: "test".to_string(),
            payment_provider_url: String::new(),
            payment_provider_api_key: String::new(),
            redis_url: None,
            payout_sweep_interval_seconds: 0,
        };
        ConflictDetectionService::new(Arc::new(SupabaseClient::new(&config)))
    }

    #[test]
    fn overlapping_interval_is_a_conflict() {
        let service = service();
        let existing = vec![appointment(t(10, 0), 30)];

        assert!(service.find_conflict(&existing, t(10, 15), 30).is_some());
        assert!(service.find_conflict(&existing, t(9, 45), 30).is_some());
        assert!(service.find_conflict(&existing, t(10, 0), 30).is_some());
    }

    #[test]
    fn adjacent_intervals_do_not_conflict() {
        let service = service();
        let existing = vec![appointment(t(10, 0), 30)];

        assert!(service.find_conflict(&existing, t(10, 30), 30).is_none());
        assert!(service.find_conflict(&existing, t(9, 30), 30).is_none());
    }

    #[test]
    fn containment_is_a_conflict_both_ways() {
        let service = service();
        let existing = vec![appointment(t(10, 0), 60)];

        // shorter request inside a longer booking
        assert!(service.find_conflict(&existing, t(10, 15), 15).is_some());

        // longer request covering a shorter booking
        let short = vec![appointment(t(10, 15), 15)];
        assert!(service.find_conflict(&short, t(10, 0), 60).is_some());
    }
}
