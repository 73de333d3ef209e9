// libs/booking-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use scheduling_cell::models::SchedulingError;
use settlement_cell::models::SettlementError;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// A booked appointment. Cancellation is a status, never a delete; rows only
/// ever move through the lifecycle transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub appointment_type_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.appointment_date.and_time(self.start_time).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at() + Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Booking input. `time` arrives as a string so the 24-hour `HH:MM` gate can
/// produce a machine-readable validation error instead of a bare 422.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub duration_minutes: Option<i32>,
    pub appointment_type_id: Option<Uuid>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_date: NaiveDate,
    pub new_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAppointmentStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentSearchQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl AppointmentSearchQuery {
    pub fn to_path(&self) -> String {
        let mut query_parts = Vec::new();

        if let Some(doctor_id) = self.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = self.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = self.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = self.from_date {
            query_parts.push(format!("appointment_date=gte.{}", from_date));
        }
        if let Some(to_date) = self.to_date {
            query_parts.push(format!("appointment_date=lte.{}", to_date));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=appointment_date.desc,start_time.desc",
            query_parts.join("&")
        );

        if let Some(limit) = self.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = self.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        path
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BookingError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment type not found")]
    AppointmentTypeNotFound,

    #[error("Time must be in 24-hour HH:MM format, got {0:?}")]
    InvalidTimeFormat(String),

    #[error("Appointment must be scheduled for a future time")]
    AppointmentInPast,

    #[error("Appointment duration must be positive")]
    InvalidDuration,

    #[error("Appointment cannot be booked more than {max_days} days in advance")]
    BookingTooFarAdvance { max_days: i64 },

    #[error("Appointment must be booked at least {min_hours} hours in advance")]
    BookingTooSoon { min_hours: i64 },

    #[error("Doctor is not working on the requested day")]
    DoctorNotWorking,

    #[error("Appointment does not fit within the doctor's working hours")]
    ExceedsWorkingHours,

    #[error("Requested slot is not available")]
    SlotNotAvailable,

    #[error("Requested slot conflicts with an existing booking")]
    SlotConflict,

    #[error("Status cannot change from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Appointment payment has not been processed")]
    PaymentNotProcessed,

    #[error("Appointment payment has not completed")]
    PaymentNotCompleted,

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Settlement error: {0}")]
    Settlement(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl BookingError {
    /// Machine-readable code surfaced to callers; conflict codes tell them to
    /// re-query availability and retry with another slot.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::NotFound => "APPOINTMENT_NOT_FOUND",
            BookingError::AppointmentTypeNotFound => "APPOINTMENT_TYPE_NOT_FOUND",
            BookingError::InvalidTimeFormat(_) => "INVALID_TIME_FORMAT",
            BookingError::AppointmentInPast => "APPOINTMENT_IN_PAST",
            BookingError::InvalidDuration => "INVALID_DURATION",
            BookingError::BookingTooFarAdvance { .. } => "BOOKING_TOO_FAR_ADVANCE",
            BookingError::BookingTooSoon { .. } => "BOOKING_TOO_SOON",
            BookingError::DoctorNotWorking => "DOCTOR_NOT_WORKING",
            BookingError::ExceedsWorkingHours => "APPOINTMENT_EXCEEDS_WORKING_HOURS",
            BookingError::SlotNotAvailable => "SLOT_NOT_AVAILABLE",
            BookingError::SlotConflict => "SLOT_CONFLICT",
            BookingError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            BookingError::PaymentNotProcessed => "PAYMENT_NOT_PROCESSED",
            BookingError::PaymentNotCompleted => "PAYMENT_NOT_COMPLETED",
            BookingError::Scheduling(_) => "SCHEDULING_ERROR",
            BookingError::Settlement(_) => "SETTLEMENT_ERROR",
            BookingError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let code = err.code();
        let message = err.to_string();

        match err {
            BookingError::NotFound | BookingError::AppointmentTypeNotFound => {
                AppError::NotFound(message)
            }
            BookingError::InvalidTimeFormat(_)
            | BookingError::AppointmentInPast
            | BookingError::InvalidDuration
            | BookingError::BookingTooFarAdvance { .. }
            | BookingError::BookingTooSoon { .. }
            | BookingError::DoctorNotWorking
            | BookingError::ExceedsWorkingHours => AppError::Validation { code, message },
            BookingError::SlotNotAvailable | BookingError::SlotConflict => {
                AppError::Conflict { code, message }
            }
            BookingError::InvalidStatusTransition { .. }
            | BookingError::PaymentNotProcessed
            | BookingError::PaymentNotCompleted => AppError::InvalidState { code, message },
            BookingError::Scheduling(_)
            | BookingError::Settlement(_)
            | BookingError::DatabaseError(_) => AppError::Database(message),
        }
    }
}

impl From<SchedulingError> for BookingError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::NotFound => BookingError::NotFound,
            SchedulingError::InvalidInput(msg) => BookingError::Scheduling(msg),
            SchedulingError::DatabaseError(msg) => BookingError::DatabaseError(msg),
        }
    }
}

impl From<SettlementError> for BookingError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::DatabaseError(msg) => BookingError::DatabaseError(msg),
            other => BookingError::Settlement(other.to_string()),
        }
    }
}
