use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Timelike};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{day_of_week, BookedSlot, DayAppointmentsQuery, SchedulingError};
use crate::services::schedule::ScheduleService;

/// Derives bookable slot starts for a doctor and date from working hours,
/// slot granularity and existing appointments.
pub struct SlotCalculatorService {
    supabase: Arc<SupabaseClient>,
    schedule: Arc<ScheduleService>,
}

impl SlotCalculatorService {
    pub fn new(supabase: Arc<SupabaseClient>, schedule: Arc<ScheduleService>) -> Self {
        Self { supabase, schedule }
    }

    /// Ordered list of open slot starts for the date. `duration` overrides the
    /// doctor's slot duration when a specific appointment type needs more time.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        duration: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        self.get_available_slots_excluding(doctor_id, date, duration, None, auth_token)
            .await
    }

    /// Same as `get_available_slots`, with one appointment left out of the
    /// conflict filter. Rescheduling validates its target slot this way so an
    /// appointment does not collide with itself.
    pub async fn get_available_slots_excluding(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        duration: Option<i32>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        debug!("Calculating available slots for doctor {} on {}", doctor_id, date);

        let rules = self.schedule.get_booking_rules(doctor_id, auth_token).await?;

        let Some(working) = self
            .schedule
            .get_working_day(doctor_id, day_of_week(date), auth_token)
            .await?
        else {
            debug!("Doctor {} is not working on {}", doctor_id, date);
            return Ok(vec![]);
        };

        let duration_minutes = duration.unwrap_or(rules.slot_duration_minutes);

        let mut candidates = generate_candidate_starts(
            working.start_time,
            working.end_time,
            rules.slot_duration_minutes,
            duration_minutes,
        );

        if let Some(allowed) = &rules.allowed_time_slots {
            if !allowed.is_empty() {
                let allowed: Vec<NaiveTime> = allowed
                    .iter()
                    .filter_map(|s| parse_slot_time(s))
                    .collect();
                candidates.retain(|slot| allowed.contains(slot));
            }
        }

        let booked = self
            .get_booked_slots(doctor_id, date, exclude_appointment_id, auth_token)
            .await?;
        candidates.retain(|slot| !conflicts_with_booked(*slot, duration_minutes, &booked));

        debug!("Found {} available slots for doctor {} on {}", candidates.len(), doctor_id, date);
        Ok(candidates)
    }

    async fn get_booked_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<BookedSlot>, SchedulingError> {
        let query = DayAppointmentsQuery {
            doctor_id,
            date,
            exclude_appointment_id,
        };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &query.to_path(), Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<BookedSlot>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }
}

// ==============================================================================
// SLOT ARITHMETIC
// ==============================================================================

fn minutes_from_midnight(t: NaiveTime) -> i32 {
    (t.hour() * 60 + t.minute()) as i32
}

/// Candidate starts from window start to window end, stepping by the slot
/// duration. A candidate whose interval would run past the window end is
/// discarded.
pub fn generate_candidate_starts(
    window_start: NaiveTime,
    window_end: NaiveTime,
    step_minutes: i32,
    duration_minutes: i32,
) -> Vec<NaiveTime> {
    if step_minutes <= 0 || duration_minutes <= 0 {
        return vec![];
    }

    let start = minutes_from_midnight(window_start);
    let end = minutes_from_midnight(window_end);

    let mut slots = Vec::new();
    let mut cursor = start;
    while cursor + duration_minutes <= end {
        if let Some(time) = NaiveTime::from_hms_opt((cursor / 60) as u32, (cursor % 60) as u32, 0) {
            slots.push(time);
        }
        cursor += step_minutes;
    }

    slots
}

/// Half-open interval intersection: `[a_start, a_end)` and `[b_start, b_end)`
/// overlap iff `a_start < b_end && b_start < a_end`.
pub fn intervals_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn conflicts_with_booked(slot: NaiveTime, duration_minutes: i32, booked: &[BookedSlot]) -> bool {
    let slot_start = minutes_from_midnight(slot);
    let slot_end = slot_start + duration_minutes;

    booked.iter().any(|appointment| {
        let booked_start = minutes_from_midnight(appointment.start_time);
        let booked_end = booked_start + appointment.duration_minutes;
        intervals_overlap(slot_start, slot_end, booked_start, booked_end)
    })
}

/// Allow-list entries come in as `HH:MM` (occasionally `HH:MM:SS` from the
/// store); anything else is skipped with a warning.
pub fn parse_slot_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| {
            warn!("Ignoring unparseable allowed slot {:?}: {}", value, e);
            e
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn booked(start: NaiveTime, duration_minutes: i32) -> BookedSlot {
        BookedSlot {
            id: Uuid::new_v4(),
            appointment_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            start_time: start,
            duration_minutes,
            status: "pending".to_string(),
        }
    }

    #[test]
    fn morning_window_produces_all_half_hour_slots() {
        let slots = generate_candidate_starts(t(9, 0), t(12, 0), 30, 30);

        assert_eq!(
            slots,
            vec![t(9, 0), t(9, 30), t(10, 0), t(10, 30), t(11, 0), t(11, 30)]
        );
    }

    #[test]
    fn candidate_running_past_window_end_is_discarded() {
        // A 60-minute appointment cannot start at 11:30 in a 09:00-12:00 window.
        let slots = generate_candidate_starts(t(9, 0), t(12, 0), 30, 60);

        assert_eq!(
            slots,
            vec![t(9, 0), t(9, 30), t(10, 0), t(10, 30), t(11, 0)]
        );
    }

    #[test]
    fn existing_booking_removes_overlapping_candidate() {
        let mut slots = generate_candidate_starts(t(9, 0), t(12, 0), 30, 30);
        let existing = vec![booked(t(9, 30), 30)];

        slots.retain(|slot| !conflicts_with_booked(*slot, 30, &existing));

        assert!(!slots.contains(&t(9, 30)));
        assert_eq!(
            slots,
            vec![t(9, 0), t(10, 0), t(10, 30), t(11, 0), t(11, 30)]
        );
    }

    #[test]
    fn long_booking_shadows_every_candidate_it_covers() {
        let mut slots = generate_candidate_starts(t(9, 0), t(12, 0), 30, 30);
        let existing = vec![booked(t(9, 30), 90)];

        slots.retain(|slot| !conflicts_with_booked(*slot, 30, &existing));

        assert_eq!(slots, vec![t(9, 0), t(11, 0), t(11, 30)]);
    }

    #[test]
    fn back_to_back_intervals_do_not_overlap() {
        assert!(!intervals_overlap(540, 570, 570, 600));
        assert!(!intervals_overlap(570, 600, 540, 570));
        assert!(intervals_overlap(540, 571, 570, 600));
    }

    #[test]
    fn cancelled_appointments_are_not_passed_to_the_filter() {
        // The day query excludes cancelled rows at the store; the filter only
        // ever sees active bookings, so a cancelled 09:30 frees the slot.
        let mut slots = generate_candidate_starts(t(9, 0), t(12, 0), 30, 30);
        let existing: Vec<BookedSlot> = vec![];

        slots.retain(|slot| !conflicts_with_booked(*slot, 30, &existing));

        assert!(slots.contains(&t(9, 30)));
    }

    #[test]
    fn parses_allow_list_entries_in_both_formats() {
        assert_eq!(parse_slot_time("09:00"), Some(t(9, 0)));
        assert_eq!(parse_slot_time("14:30:00"), Some(t(14, 30)));
        assert_eq!(parse_slot_time("9am"), None);
    }
}
