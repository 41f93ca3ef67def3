use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures raised by an appointment or provider store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

/// Failures raised by a notification sender or event publisher.
///
/// These never reach the caller of a scheduling operation; the outbox logs
/// them and moves on.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("Requested slot is no longer available for provider {provider_id} at {start}")]
    Collision {
        provider_id: String,
        start: DateTime<Utc>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SchedulingError {
    pub fn provider_not_found(id: &str) -> Self {
        SchedulingError::NotFound {
            entity: "Provider",
            id: id.to_string(),
        }
    }

    pub fn appointment_not_found(id: impl ToString) -> Self {
        SchedulingError::NotFound {
            entity: "Appointment",
            id: id.to_string(),
        }
    }

    /// Text suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            SchedulingError::Collision { .. } => {
                "That time slot was just taken. Please choose another time."
            }
            SchedulingError::NotFound { .. } => "The requested item is not available.",
            SchedulingError::InvalidArgument(_) => "The request contains invalid values.",
            SchedulingError::Storage(_) => "Something went wrong. Please try again later.",
        }
    }

    /// Only storage failures may be worth retrying; collisions require the
    /// user to pick a new slot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::Storage(_))
    }
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;
