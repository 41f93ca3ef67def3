//! Data models for the appointment scheduling engine.
//!
//! This module defines the core data structures used throughout the crate:
//! - AppointmentStatus / PaymentStatus: closed status enums
//! - Interval: half-open time window used for slots and collisions
//! - Appointment: a booked session between a provider and a client
//! - BookingRequest: a client's request to book a slot
//! - AvailabilitySlot: a bookable window returned to callers

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SchedulingError;

pub type AppointmentId = Uuid;

pub const DEFAULT_DURATION_MINUTES: u32 = 60;

/// Appointment status.
///
/// CANCELLED and REJECTED appointments no longer occupy their slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Paid,
    Completed,
    Cancelled,
    Rejected,
}

impl AppointmentStatus {
    pub fn name(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Paid => "PAID",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Rejected => "REJECTED",
        }
    }

    /// Whether an appointment in this status still holds its time slot.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Rejected
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AppointmentStatus {
    type Err = SchedulingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "paid" => Ok(AppointmentStatus::Paid),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "rejected" => Ok(AppointmentStatus::Rejected),
            _ => Err(SchedulingError::InvalidArgument(format!(
                "Invalid status: '{}'. Must be one of: pending, confirmed, paid, completed, cancelled, rejected",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Exempted,
    Paid,
}

impl PaymentStatus {
    /// Free sessions need no payment.
    pub fn for_amount(amount_cents: Option<u64>) -> Self {
        match amount_cents {
            Some(amount) if amount > 0 => PaymentStatus::Pending,
            _ => PaymentStatus::Exempted,
        }
    }
}

/// A half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SchedulingError> {
        if end <= start {
            return Err(SchedulingError::InvalidArgument(
                "End time must be after start time".to_string(),
            ));
        }
        Ok(Interval { start, end })
    }

    /// Fails when the end lies past the latest representable instant.
    pub fn starting_at(start: DateTime<Utc>, duration_minutes: u32) -> Result<Self, SchedulingError> {
        let end = start
            .checked_add_signed(Duration::minutes(i64::from(duration_minutes)))
            .ok_or_else(|| {
                SchedulingError::InvalidArgument(format!(
                    "A {} minute session starting at {} is out of range",
                    duration_minutes, start
                ))
            })?;
        Ok(Interval { start, end })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps_with(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// A booked session. Only the scheduler mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub provider_id: String,
    pub client_id: String,
    pub date_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: Option<u64>,
    pub service_package_id: Option<String>,
    pub notes: Option<String>,
    pub meeting_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Create a new pending appointment from a validated request.
    pub fn from_request(request: BookingRequest, created_at: DateTime<Utc>) -> Self {
        let payment_status = PaymentStatus::for_amount(request.amount_cents);
        Appointment {
            id: Uuid::new_v4(),
            provider_id: request.provider_id,
            client_id: request.client_id,
            date_time: request.date_time,
            duration_minutes: request.duration_minutes,
            status: AppointmentStatus::Pending,
            payment_status,
            amount_cents: request.amount_cents,
            service_package_id: request.service_package_id,
            notes: request.notes,
            meeting_link: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Stored records were range-checked on write; the end saturates.
    pub fn interval(&self) -> Interval {
        Interval::starting_at(self.date_time, self.duration_minutes).unwrap_or(Interval {
            start: self.date_time,
            end: DateTime::<Utc>::MAX_UTC,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &AppointmentPatch, updated_at: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(payment_status) = patch.payment_status {
            self.payment_status = payment_status;
        }
        if let Some(date_time) = patch.date_time {
            self.date_time = date_time;
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone());
        }
        if let Some(link) = &patch.meeting_link {
            self.meeting_link = Some(link.clone());
        }
        self.updated_at = updated_at;
    }
}

/// Fields a lifecycle operation may change on an existing appointment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentPatch {
    pub status: Option<AppointmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub date_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub meeting_link: Option<String>,
}

/// A client's request to book a session with a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub provider_id: String,
    pub client_id: String,
    pub date_time: DateTime<Utc>,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    pub amount_cents: Option<u64>,
    pub service_package_id: Option<String>,
    pub notes: Option<String>,
}

fn default_duration_minutes() -> u32 {
    DEFAULT_DURATION_MINUTES
}

impl BookingRequest {
    /// Create a request with the default session length.
    pub fn new(
        provider_id: impl Into<String>,
        client_id: impl Into<String>,
        date_time: DateTime<Utc>,
    ) -> Self {
        BookingRequest {
            provider_id: provider_id.into(),
            client_id: client_id.into(),
            date_time,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            amount_cents: None,
            service_package_id: None,
            notes: None,
        }
    }

    pub fn with_duration(mut self, duration_minutes: u32) -> Self {
        self.duration_minutes = duration_minutes;
        self
    }

    pub fn with_amount(mut self, amount_cents: u64) -> Self {
        self.amount_cents = Some(amount_cents);
        self
    }

    pub fn with_service_package(mut self, package_id: impl Into<String>) -> Self {
        self.service_package_id = Some(package_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn interval(&self) -> Result<Interval, SchedulingError> {
        Interval::starting_at(self.date_time, self.duration_minutes)
    }

    /// Check the fields that need no I/O.
    pub fn validate(&self, max_duration_minutes: u32) -> Result<(), SchedulingError> {
        if self.provider_id.trim().is_empty() {
            return Err(SchedulingError::InvalidArgument(
                "Provider ID cannot be empty".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(SchedulingError::InvalidArgument(
                "Client ID cannot be empty".to_string(),
            ));
        }
        validate_duration(self.duration_minutes, max_duration_minutes)
    }
}

pub fn validate_duration(duration_minutes: u32, max_duration_minutes: u32) -> Result<(), SchedulingError> {
    if duration_minutes == 0 {
        return Err(SchedulingError::InvalidArgument(
            "Duration must be positive".to_string(),
        ));
    }
    if duration_minutes > max_duration_minutes {
        return Err(SchedulingError::InvalidArgument(format!(
            "Duration of {} minutes exceeds the maximum of {} minutes",
            duration_minutes, max_duration_minutes
        )));
    }
    Ok(())
}

/// A bookable window. Always computed fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

impl From<Interval> for AvailabilitySlot {
    fn from(interval: Interval) -> Self {
        AvailabilitySlot {
            start: interval.start,
            end: interval.end,
            available: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, hour, minute, 0).unwrap()
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Confirmed".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::Confirmed
        );
        assert_eq!(
            " cancelled ".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::Cancelled
        );
    }

    #[test]
    fn unknown_status_is_invalid_argument() {
        let err = "archived".parse::<AppointmentStatus>().unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument(_)));
    }

    #[test]
    fn cancelled_and_rejected_free_the_slot() {
        assert!(AppointmentStatus::Pending.is_active());
        assert!(AppointmentStatus::Paid.is_active());
        assert!(!AppointmentStatus::Cancelled.is_active());
        assert!(!AppointmentStatus::Rejected.is_active());
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&AppointmentStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }

    #[test]
    fn payment_status_from_amount() {
        assert_eq!(PaymentStatus::for_amount(Some(4500)), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::for_amount(Some(0)), PaymentStatus::Exempted);
        assert_eq!(PaymentStatus::for_amount(None), PaymentStatus::Exempted);
    }

    #[test]
    fn back_to_back_intervals_do_not_overlap() {
        let first = Interval::starting_at(at(10, 0), 60).unwrap();
        let second = Interval::starting_at(at(11, 0), 60).unwrap();
        assert!(!first.overlaps_with(&second));
        assert!(!second.overlaps_with(&first));
    }

    #[test]
    fn interval_rejects_inverted_bounds() {
        assert!(Interval::new(at(11, 0), at(10, 0)).is_err());
        assert!(Interval::new(at(10, 0), at(10, 0)).is_err());
        assert_eq!(Interval::new(at(10, 0), at(10, 45)).unwrap().duration_minutes(), 45);
    }

    #[test]
    fn interval_past_the_calendar_end_is_rejected() {
        let err = Interval::starting_at(DateTime::<Utc>::MAX_UTC, 30).unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument(_)));
        assert!(BookingRequest::new("p1", "c1", DateTime::<Utc>::MAX_UTC)
            .interval()
            .is_err());
    }

    #[test]
    fn stored_interval_saturates_instead_of_panicking() {
        let appointment = Appointment::from_request(
            BookingRequest::new("p1", "c1", DateTime::<Utc>::MAX_UTC),
            at(8, 0),
        );
        assert_eq!(appointment.interval().end, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn request_validation_fails_fast() {
        let ok = BookingRequest::new("p1", "c1", at(9, 0));
        assert!(ok.validate(480).is_ok());
        assert!(ok.clone().with_duration(0).validate(480).is_err());
        assert!(ok.clone().with_duration(481).validate(480).is_err());
        assert!(BookingRequest::new(" ", "c1", at(9, 0)).validate(480).is_err());
        assert!(BookingRequest::new("p1", "", at(9, 0)).validate(480).is_err());
    }

    #[test]
    fn request_json_defaults_duration() {
        let request: BookingRequest = serde_json::from_str(
            r#"{"providerId":"p1","clientId":"c1","dateTime":"2030-01-07T09:00:00Z","amountCents":null,"servicePackageId":null,"notes":null}"#,
        )
        .unwrap();
        assert_eq!(request.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert_eq!(request.date_time, at(9, 0));
    }

    #[test]
    fn new_appointment_is_pending() {
        let request = BookingRequest::new("p1", "c1", at(9, 0))
            .with_amount(2500)
            .with_notes("first visit");
        let appointment = Appointment::from_request(request, at(8, 0));
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.payment_status, PaymentStatus::Pending);
        assert_eq!(appointment.interval().end, at(10, 0));
        assert_eq!(appointment.notes.as_deref(), Some("first visit"));
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut appointment =
            Appointment::from_request(BookingRequest::new("p1", "c1", at(9, 0)), at(8, 0));
        let patch = AppointmentPatch {
            meeting_link: Some("https://meet.example.com/abc".into()),
            ..Default::default()
        };
        appointment.apply(&patch, at(8, 30));
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.date_time, at(9, 0));
        assert_eq!(appointment.updated_at, at(8, 30));
        assert!(appointment.meeting_link.is_some());
    }
}
