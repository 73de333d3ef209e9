// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

// ==============================================================================
// SCHEDULE MODELS
// ==============================================================================

/// One weekday row of a doctor's recurring schedule. `day_of_week` follows
/// the store convention 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorWorkingHours {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_working: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-doctor booking constraints. `allowed_time_slots` is an optional
/// allow-list of `HH:MM` starts; when present and non-empty only those
/// starts are bookable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorBookingRules {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub allowed_time_slots: Option<Vec<String>>,
    pub slot_duration_minutes: i32,
    pub booking_advance_days_max: i64,
    pub min_booking_hours_ahead: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DoctorBookingRules {
    /// Rules applied when a doctor has not configured any.
    pub fn defaults_for(doctor_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            allowed_time_slots: None,
            slot_duration_minutes: 30,
            booking_advance_days_max: 90,
            min_booking_hours_ahead: 2,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentType {
    pub id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    pub price: f64,
    pub requires_payment: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lean appointment projection used for slot computation. Only the interval
/// and status matter here; the full appointment model lives in booking-cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedSlot {
    pub id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: String,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursEntry {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_working: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertWorkingHoursRequest {
    pub entries: Vec<WorkingHoursEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertBookingRulesRequest {
    pub allowed_time_slots: Option<Vec<String>>,
    pub slot_duration_minutes: Option<i32>,
    pub booking_advance_days_max: Option<i64>,
    pub min_booking_hours_ahead: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentTypeRequest {
    pub name: String,
    pub duration_minutes: i32,
    pub price: f64,
    pub requires_payment: bool,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub duration: Option<i32>,
}

// ==============================================================================
// TYPED STORE QUERIES
// ==============================================================================

/// A doctor's non-cancelled appointments on one date.
#[derive(Debug, Clone)]
pub struct DayAppointmentsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub exclude_appointment_id: Option<Uuid>,
}

impl DayAppointmentsQuery {
    pub fn to_path(&self) -> String {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=neq.cancelled",
            self.doctor_id, self.date
        );
        if let Some(exclude_id) = self.exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }
        path.push_str("&order=start_time.asc");
        path
    }
}

#[derive(Debug, Clone)]
pub struct WorkingHoursQuery {
    pub doctor_id: Uuid,
    pub day_of_week: Option<i32>,
}

impl WorkingHoursQuery {
    pub fn to_path(&self) -> String {
        let mut path = format!(
            "/rest/v1/doctor_working_hours?doctor_id=eq.{}",
            self.doctor_id
        );
        if let Some(day) = self.day_of_week {
            path.push_str(&format!("&day_of_week=eq.{}", day));
        }
        path.push_str("&order=day_of_week.asc");
        path
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Schedule entry not found")]
    NotFound,

    #[error("Invalid schedule input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::NotFound => AppError::NotFound("Schedule entry not found".to_string()),
            SchedulingError::InvalidInput(msg) => AppError::BadRequest(msg),
            SchedulingError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

/// Map a chrono weekday onto the store's 0 = Sunday .. 6 = Saturday scheme.
pub fn day_of_week(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.weekday().num_days_from_sunday() as i32
}
