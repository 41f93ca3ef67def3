//! Appointment scheduling and availability engine for a provider/client
//! wellness marketplace.
//!
//! Providers publish a recurring weekly schedule and blocked dates; clients
//! book fixed-length sessions out of the free slots. The engine guarantees
//! that no two active appointments of a provider overlap.

pub mod calendar;
pub mod clock;
pub mod collision;
pub mod config;
pub mod error;
mod lifecycle;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod scheduler;
pub mod telemetry;

pub use calendar::{DaySchedule, Provider, ProviderAvailability, TimeRange};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, SchedulerConfig};
pub use error::{DeliveryError, SchedulingError, SchedulingResult, StorageError};
pub use models::{
    Appointment, AppointmentId, AppointmentStatus, AvailabilitySlot, BookingRequest, Interval,
    PaymentStatus,
};
pub use outbox::{ChangeEvent, EventPublisher, Notification, Notifier, Outbox, OutboxWorker};
pub use repository::{
    AppointmentRepository, InMemoryAppointmentRepository, InMemoryProviderRepository,
    ProviderRepository,
};
pub use scheduler::AppointmentScheduler;
