//! Availability calculation and the booking transaction.
//!
//! [`AppointmentScheduler`] owns every appointment mutation. Booking and the
//! lifecycle operations in `lifecycle.rs` hold the provider's write lock
//! across their collision re-check and commit, so two writes for the same
//! provider never interleave. Availability reads take no lock.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::calendar::{generate_candidate_slots, local_day_bounds, Provider};
use crate::clock::{Clock, SystemClock};
use crate::collision::{active_intervals, find_conflict, overlaps};
use crate::config::SchedulerConfig;
use crate::error::{SchedulingError, SchedulingResult};
use crate::models::{
    validate_duration, Appointment, AppointmentId, AvailabilitySlot, BookingRequest, Interval,
};
use crate::outbox::{ChangeEvent, Notification, NotificationKind, Outbox};
use crate::repository::{AppointmentRepository, ProviderRepository};

/// Per-provider write locks.
#[derive(Default)]
pub(crate) struct ProviderLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProviderLocks {
    pub(crate) async fn acquire(&self, provider_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(provider_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct AppointmentScheduler {
    pub(crate) providers: Arc<dyn ProviderRepository>,
    pub(crate) appointments: Arc<dyn AppointmentRepository>,
    pub(crate) outbox: Outbox,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SchedulerConfig,
    pub(crate) locks: ProviderLocks,
}

impl AppointmentScheduler {
    pub fn new(
        providers: Arc<dyn ProviderRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        outbox: Outbox,
    ) -> Self {
        AppointmentScheduler {
            providers,
            appointments,
            outbox,
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
            locks: ProviderLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) async fn load_provider(&self, provider_id: &str) -> SchedulingResult<Provider> {
        self.providers
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| SchedulingError::provider_not_found(provider_id))
    }

    /// All appointments of the provider touching the provider-local days
    /// that `interval` spans.
    pub(crate) async fn appointments_around(
        &self,
        provider: &Provider,
        interval: &Interval,
    ) -> SchedulingResult<Vec<Appointment>> {
        let offset = provider.offset()?;
        let (window_start, _) = local_day_bounds(offset, provider.local_date(interval.start)?)?;
        let (_, window_end) = local_day_bounds(offset, provider.local_date(interval.end)?)?;
        Ok(self
            .appointments
            .list_by_provider_and_range(&provider.id, window_start, window_end)
            .await?)
    }

    /// Reject instants at or before now.
    pub(crate) fn ensure_future(&self, start: DateTime<Utc>) -> SchedulingResult<()> {
        if start <= self.clock.now() {
            return Err(SchedulingError::InvalidArgument(format!(
                "Cannot book into the past: {}",
                start.format("%Y-%m-%d %H:%M UTC")
            )));
        }
        Ok(())
    }

    /// Bookable slots for a provider on a provider-local date.
    ///
    /// `duration_minutes` falls back to the configured default session
    /// length. An unscheduled or blocked day yields an empty list.
    pub async fn get_availability(
        &self,
        provider_id: &str,
        date: NaiveDate,
        duration_minutes: Option<u32>,
    ) -> SchedulingResult<Vec<AvailabilitySlot>> {
        let duration = duration_minutes.unwrap_or(self.config.default_duration_minutes);
        validate_duration(duration, self.config.max_duration_minutes)?;

        let provider = self.load_provider(provider_id).await?;
        let offset = provider.offset()?;
        let (day_start, day_end) = local_day_bounds(offset, date)?;

        let candidates = generate_candidate_slots(&provider.availability, offset, date, duration);
        if candidates.is_empty() {
            debug!(provider_id, %date, "No schedule for date");
            return Ok(Vec::new());
        }

        let existing = self
            .appointments
            .list_by_provider_and_range(provider_id, day_start, day_end)
            .await?;
        let busy = active_intervals(&existing);
        let now = self.clock.now();

        let mut slots: Vec<AvailabilitySlot> = candidates
            .into_iter()
            .filter(|candidate| candidate.start > now)
            .filter(|candidate| !overlaps(candidate, &busy))
            .map(AvailabilitySlot::from)
            .collect();
        slots.sort_by_key(|slot| slot.start);
        slots.dedup_by_key(|slot| slot.start);

        debug!(
            provider_id,
            %date,
            duration,
            available = slots.len(),
            busy = busy.len(),
            "Computed availability"
        );
        Ok(slots)
    }

    /// Book a slot, re-checking for collisions against fresh data under the
    /// provider's write lock.
    pub async fn book_appointment(&self, request: BookingRequest) -> SchedulingResult<AppointmentId> {
        request.validate(self.config.max_duration_minutes)?;
        self.ensure_future(request.date_time)?;

        let provider = self.load_provider(&request.provider_id).await?;
        let candidate = request.interval()?;

        let _guard = self.locks.acquire(&provider.id).await;

        let existing = self.appointments_around(&provider, &candidate).await?;
        if let Some(conflict) = find_conflict(&candidate, &existing, None) {
            warn!(
                provider_id = %provider.id,
                start = %candidate.start,
                conflicting = %conflict.id,
                "Booking rejected, slot already taken"
            );
            return Err(SchedulingError::Collision {
                provider_id: provider.id,
                start: candidate.start,
            });
        }

        let appointment = Appointment::from_request(request, self.clock.now());
        let id = appointment.id;
        let provider_id = appointment.provider_id.clone();
        let client_id = appointment.client_id.clone();
        let starts_at = appointment.date_time;
        self.appointments.insert(appointment).await?;

        info!(
            appointment_id = %id,
            %provider_id,
            %client_id,
            start = %starts_at,
            "Appointment booked"
        );

        let when = starts_at.format("%Y-%m-%d %H:%M UTC");
        self.outbox.notify(
            &provider_id,
            Notification {
                kind: NotificationKind::AppointmentCreated,
                title: "New appointment request".to_string(),
                message: format!("A client requested a session on {}", when),
                link: appointment_link(id),
            },
        );
        self.outbox.notify(
            &client_id,
            Notification {
                kind: NotificationKind::AppointmentCreated,
                title: "Appointment requested".to_string(),
                message: format!("Your session on {} is awaiting confirmation", when),
                link: appointment_link(id),
            },
        );
        self.outbox.publish(ChangeEvent::Created {
            appointment_id: id,
            provider_id,
            client_id,
        });

        Ok(id)
    }
}

pub(crate) fn appointment_link(id: AppointmentId) -> String {
    format!("/appointments/{}", id)
}
