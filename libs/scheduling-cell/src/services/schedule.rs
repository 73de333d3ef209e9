use std::sync::Arc;

use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    AppointmentType, CreateAppointmentTypeRequest, DoctorBookingRules, DoctorWorkingHours,
    SchedulingError, UpsertBookingRulesRequest, WorkingHoursEntry, WorkingHoursQuery,
};

/// Store access for doctor schedules, booking rules and appointment types.
pub struct ScheduleService {
    supabase: Arc<SupabaseClient>,
}

impl ScheduleService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn get_working_hours(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DoctorWorkingHours>, SchedulingError> {
        let query = WorkingHoursQuery { doctor_id, day_of_week: None };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &query.to_path(), Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<DoctorWorkingHours>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse working hours: {}", e)))
    }

    /// The working-hours row for one weekday, if the doctor works that day.
    pub async fn get_working_day(
        &self,
        doctor_id: Uuid,
        day_of_week: i32,
        auth_token: &str,
    ) -> Result<Option<DoctorWorkingHours>, SchedulingError> {
        let query = WorkingHoursQuery { doctor_id, day_of_week: Some(day_of_week) };

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &query.to_path(), Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let Some(row) = result.into_iter().next() else {
            return Ok(None);
        };

        let hours: DoctorWorkingHours = serde_json::from_value(row)
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse working hours: {}", e)))?;

        if !hours.is_working {
            return Ok(None);
        }

        Ok(Some(hours))
    }

    /// Replace a doctor's recurring schedule with the given entries.
    pub async fn upsert_working_hours(
        &self,
        doctor_id: Uuid,
        entries: Vec<WorkingHoursEntry>,
        auth_token: &str,
    ) -> Result<Vec<DoctorWorkingHours>, SchedulingError> {
        for entry in &entries {
            if entry.day_of_week < 0 || entry.day_of_week > 6 {
                return Err(SchedulingError::InvalidInput(
                    "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                ));
            }
            if entry.start_time >= entry.end_time {
                return Err(SchedulingError::InvalidInput(
                    "Start time must be before end time".to_string(),
                ));
            }
        }

        debug!("Replacing working hours for doctor {} ({} entries)", doctor_id, entries.len());

        let delete_path = format!("/rest/v1/doctor_working_hours?doctor_id=eq.{}", doctor_id);
        self.supabase
            .delete(&delete_path, Some(auth_token))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        let rows: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "doctor_id": doctor_id,
                    "day_of_week": entry.day_of_week,
                    "start_time": entry.start_time.format("%H:%M:%S").to_string(),
                    "end_time": entry.end_time.format("%H:%M:%S").to_string(),
                    "is_working": entry.is_working,
                    "created_at": now.to_rfc3339(),
                    "updated_at": now.to_rfc3339()
                })
            })
            .collect();

        let result = self
            .supabase
            .insert_returning("/rest/v1/doctor_working_hours", Some(auth_token), json!(rows))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<DoctorWorkingHours>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse working hours: {}", e)))
    }

    /// Booking rules for a doctor, falling back to platform defaults when the
    /// doctor has not configured any.
    pub async fn get_booking_rules(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorBookingRules, SchedulingError> {
        let path = format!("/rest/v1/doctor_booking_rules?doctor_id=eq.{}", doctor_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse booking rules: {}", e))),
            None => Ok(DoctorBookingRules::defaults_for(doctor_id)),
        }
    }

    pub async fn upsert_booking_rules(
        &self,
        doctor_id: Uuid,
        request: UpsertBookingRulesRequest,
        auth_token: &str,
    ) -> Result<DoctorBookingRules, SchedulingError> {
        if let Some(duration) = request.slot_duration_minutes {
            if duration <= 0 {
                return Err(SchedulingError::InvalidInput(
                    "Slot duration must be positive".to_string(),
                ));
            }
        }

        let mut update_data = serde_json::Map::new();
        if let Some(slots) = &request.allowed_time_slots {
            update_data.insert("allowed_time_slots".to_string(), json!(slots));
        }
        if let Some(duration) = request.slot_duration_minutes {
            update_data.insert("slot_duration_minutes".to_string(), json!(duration));
        }
        if let Some(days) = request.booking_advance_days_max {
            update_data.insert("booking_advance_days_max".to_string(), json!(days));
        }
        if let Some(hours) = request.min_booking_hours_ahead {
            update_data.insert("min_booking_hours_ahead".to_string(), json!(hours));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/doctor_booking_rules?doctor_id=eq.{}", doctor_id);
        let updated = self
            .supabase
            .update_returning(&path, Some(auth_token), Value::Object(update_data))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if let Some(row) = updated.into_iter().next() {
            return serde_json::from_value(row)
                .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse booking rules: {}", e)));
        }

        // No row yet for this doctor; create one from the defaults.
        let defaults = DoctorBookingRules::defaults_for(doctor_id);
        let mut insert_data = serde_json::Map::new();
        insert_data.insert("doctor_id".to_string(), json!(doctor_id));
        insert_data.insert(
            "allowed_time_slots".to_string(),
            json!(request.allowed_time_slots),
        );
        insert_data.insert(
            "slot_duration_minutes".to_string(),
            json!(request.slot_duration_minutes.unwrap_or(defaults.slot_duration_minutes)),
        );
        insert_data.insert(
            "booking_advance_days_max".to_string(),
            json!(request.booking_advance_days_max.unwrap_or(defaults.booking_advance_days_max)),
        );
        insert_data.insert(
            "min_booking_hours_ahead".to_string(),
            json!(request.min_booking_hours_ahead.unwrap_or(defaults.min_booking_hours_ahead)),
        );
        insert_data.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        insert_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let created = self
            .supabase
            .insert_returning("/rest/v1/doctor_booking_rules", Some(auth_token), Value::Object(insert_data))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = created
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::DatabaseError("Failed to create booking rules".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse booking rules: {}", e)))
    }

    pub async fn list_appointment_types(
        &self,
        auth_token: &str,
    ) -> Result<Vec<AppointmentType>, SchedulingError> {
        let path = "/rest/v1/appointment_types?is_active=eq.true&order=name.asc";

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentType>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment types: {}", e)))
    }

    pub async fn get_appointment_type(
        &self,
        type_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentType, SchedulingError> {
        let path = format!("/rest/v1/appointment_types?id=eq.{}", type_id);

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(SchedulingError::NotFound)?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment type: {}", e)))
    }

    pub async fn create_appointment_type(
        &self,
        request: CreateAppointmentTypeRequest,
        auth_token: &str,
    ) -> Result<AppointmentType, SchedulingError> {
        if request.duration_minutes <= 0 {
            return Err(SchedulingError::InvalidInput(
                "Appointment type duration must be positive".to_string(),
            ));
        }
        if request.price < 0.0 {
            return Err(SchedulingError::InvalidInput(
                "Appointment type price cannot be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let type_data = json!({
            "name": request.name,
            "duration_minutes": request.duration_minutes,
            "price": request.price,
            "requires_payment": request.requires_payment,
            "is_active": true,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result = self
            .supabase
            .insert_returning("/rest/v1/appointment_types", Some(auth_token), type_data)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::DatabaseError("Failed to create appointment type".to_string()))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse appointment type: {}", e)))
    }
}
