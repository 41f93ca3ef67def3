//! Appointment lifecycle: status changes, cancellation, rescheduling and
//! meeting links.
//!
//! Every mutation runs under the provider's write lock, re-reads the record
//! once the lock is held, and enqueues its side effects only after the write
//! has committed.

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::collision::find_conflict;
use crate::error::{SchedulingError, SchedulingResult};
use crate::models::{
    Appointment, AppointmentId, AppointmentPatch, AppointmentStatus, Interval, PaymentStatus,
};
use crate::outbox::{ChangeEvent, Notification, NotificationKind};
use crate::scheduler::{appointment_link, AppointmentScheduler};

impl AppointmentScheduler {
    pub async fn get_appointment(&self, id: AppointmentId) -> SchedulingResult<Appointment> {
        self.appointments
            .get(id)
            .await?
            .ok_or_else(|| SchedulingError::appointment_not_found(id))
    }

    /// Lock the appointment's provider and return a fresh copy of the record.
    async fn lock_appointment(
        &self,
        id: AppointmentId,
    ) -> SchedulingResult<(OwnedMutexGuard<()>, Appointment)> {
        let provider_id = self.get_appointment(id).await?.provider_id;
        let guard = self.locks.acquire(&provider_id).await;
        let appointment = self.get_appointment(id).await?;
        Ok((guard, appointment))
    }

    async fn commit(&self, id: AppointmentId, patch: AppointmentPatch) -> SchedulingResult<Appointment> {
        self.appointments
            .update(id, patch, self.clock.now())
            .await?
            .ok_or_else(|| SchedulingError::appointment_not_found(id))
    }

    /// Fail with a collision if `interval` overlaps another active
    /// appointment of the same provider.
    async fn ensure_free(&self, appointment: &Appointment, interval: &Interval) -> SchedulingResult<()> {
        let provider = self.load_provider(&appointment.provider_id).await?;
        let existing = self.appointments_around(&provider, interval).await?;
        if let Some(conflict) = find_conflict(interval, &existing, Some(appointment.id)) {
            warn!(
                appointment_id = %appointment.id,
                provider_id = %provider.id,
                start = %interval.start,
                conflicting = %conflict.id,
                "Slot already taken"
            );
            return Err(SchedulingError::Collision {
                provider_id: provider.id,
                start: interval.start,
            });
        }
        Ok(())
    }

    fn notify_both(&self, appointment: &Appointment, kind: NotificationKind, title: &str, message: String) {
        for user_id in [&appointment.provider_id, &appointment.client_id] {
            self.outbox.notify(
                user_id,
                Notification {
                    kind,
                    title: title.to_string(),
                    message: message.clone(),
                    link: appointment_link(appointment.id),
                },
            );
        }
    }

    /// Write a new status.
    ///
    /// Moving a cancelled or rejected appointment back to an active status
    /// re-claims its slot, so that case is collision-checked first.
    pub async fn update_status(&self, id: AppointmentId, status: AppointmentStatus) -> SchedulingResult<()> {
        let (_guard, current) = self.lock_appointment(id).await?;

        if !current.is_active() && status.is_active() {
            self.ensure_free(&current, &current.interval()).await?;
        }

        let patch = AppointmentPatch {
            status: Some(status),
            payment_status: (status == AppointmentStatus::Paid).then_some(PaymentStatus::Paid),
            ..Default::default()
        };
        let updated = self.commit(id, patch).await?;

        info!(appointment_id = %id, from = %current.status, to = %status, "Appointment status updated");

        self.notify_both(
            &updated,
            NotificationKind::AppointmentStatusUpdated,
            "Appointment updated",
            format!(
                "Your session on {} is now {}",
                updated.date_time.format("%Y-%m-%d %H:%M UTC"),
                status.name().to_lowercase()
            ),
        );
        self.outbox.publish(ChangeEvent::StatusUpdated {
            appointment_id: id,
            status,
        });
        Ok(())
    }

    /// Parse an open string status at the boundary, then update.
    pub async fn update_status_str(&self, id: AppointmentId, status: &str) -> SchedulingResult<()> {
        let status: AppointmentStatus = status.parse()?;
        self.update_status(id, status).await
    }

    /// Cancel and free the slot. The record is kept; `reason` is appended
    /// to its notes.
    pub async fn cancel_appointment(&self, id: AppointmentId, reason: &str) -> SchedulingResult<()> {
        let (_guard, current) = self.lock_appointment(id).await?;

        let reason = reason.trim();
        let notes = match (current.notes.as_deref(), reason.is_empty()) {
            (_, true) => None,
            (Some(prior), false) if !prior.trim().is_empty() => {
                Some(format!("{}\n\nCancellation reason: {}", prior, reason))
            }
            (_, false) => Some(format!("Cancellation reason: {}", reason)),
        };

        let patch = AppointmentPatch {
            status: Some(AppointmentStatus::Cancelled),
            notes,
            ..Default::default()
        };
        let updated = self.commit(id, patch).await?;

        info!(appointment_id = %id, provider_id = %updated.provider_id, "Appointment cancelled");

        self.notify_both(
            &updated,
            NotificationKind::AppointmentCancelled,
            "Appointment cancelled",
            format!(
                "The session on {} was cancelled",
                updated.date_time.format("%Y-%m-%d %H:%M UTC")
            ),
        );
        self.outbox.publish(ChangeEvent::StatusUpdated {
            appointment_id: id,
            status: AppointmentStatus::Cancelled,
        });
        Ok(())
    }

    /// Move an appointment to a new start. The duration is kept, the status
    /// returns to PENDING, and the record is untouched on collision.
    pub async fn reschedule_appointment(
        &self,
        id: AppointmentId,
        new_date_time: DateTime<Utc>,
    ) -> SchedulingResult<()> {
        self.ensure_future(new_date_time)?;
        let (_guard, current) = self.lock_appointment(id).await?;

        let candidate = Interval::starting_at(new_date_time, current.duration_minutes)?;
        self.ensure_free(&current, &candidate).await?;

        let patch = AppointmentPatch {
            status: Some(AppointmentStatus::Pending),
            date_time: Some(new_date_time),
            ..Default::default()
        };
        let updated = self.commit(id, patch).await?;

        info!(
            appointment_id = %id,
            from = %current.date_time,
            to = %new_date_time,
            "Appointment rescheduled"
        );

        self.notify_both(
            &updated,
            NotificationKind::AppointmentRescheduled,
            "Appointment rescheduled",
            format!(
                "The session moved to {} and awaits confirmation",
                new_date_time.format("%Y-%m-%d %H:%M UTC")
            ),
        );
        self.outbox.publish(ChangeEvent::Rescheduled {
            appointment_id: id,
            date_time: new_date_time,
        });
        Ok(())
    }

    /// Attach a meeting link. Publishes a change event but sends no
    /// notification.
    pub async fn update_meeting_link(&self, id: AppointmentId, link: &str) -> SchedulingResult<()> {
        let link = link.trim();
        validate_link(link)?;
        let (_guard, _) = self.lock_appointment(id).await?;

        let patch = AppointmentPatch {
            meeting_link: Some(link.to_string()),
            ..Default::default()
        };
        self.commit(id, patch).await?;

        info!(appointment_id = %id, "Meeting link updated");

        self.outbox.publish(ChangeEvent::Updated {
            appointment_id: id,
            field: "meetingLink".to_string(),
            value: link.to_string(),
        });
        Ok(())
    }
}

fn validate_link(link: &str) -> SchedulingResult<()> {
    let rest = link
        .strip_prefix("https://")
        .or_else(|| link.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.contains(char::is_whitespace) => Ok(()),
        _ => Err(SchedulingError::InvalidArgument(format!(
            "Meeting link must be an http(s) URL, got '{}'",
            link
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{SchedulingError, StorageError};
    use crate::models::{AppointmentStatus, PaymentStatus};
    use crate::scheduler::fixtures::*;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    #[tokio::test]
    async fn reschedule_past_the_calendar_end_is_invalid() {
        let h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();

        let err = h
            .scheduler
            .reschedule_appointment(id, DateTime::<Utc>::MAX_UTC)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument(_)));
        assert_eq!(
            h.scheduler.get_appointment(id).await.unwrap().date_time,
            monday_at(9, 0)
        );
    }

    #[tokio::test]
    async fn failed_writes_leave_the_record_and_outbox_untouched() {
        let (scheduler, store, mut worker) = flaky_harness().await;
        let id = scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        assert_eq!(worker.drain().await, 3);

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = scheduler
            .reschedule_appointment(id, monday_at(11, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Storage(StorageError::Unavailable(_))));
        let err = scheduler.cancel_appointment(id, "client sick").await.unwrap_err();
        assert!(matches!(err, SchedulingError::Storage(_)));
        let err = scheduler
            .update_status(id, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Storage(_)));
        assert_eq!(worker.drain().await, 0);

        let record = scheduler.get_appointment(id).await.unwrap();
        assert_eq!(record.date_time, monday_at(9, 0));
        assert_eq!(record.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn cancellation_frees_the_slot_and_keeps_the_record() {
        let mut h = harness().await;
        let id = h
            .scheduler
            .book_appointment(request_at(10, 0).with_notes("bring forms"))
            .await
            .unwrap();
        h.worker.drain().await;

        h.scheduler.cancel_appointment(id, "client sick").await.unwrap();

        let slots = h
            .scheduler
            .get_availability(PROVIDER, monday(), None)
            .await
            .unwrap();
        assert!(slots.iter().any(|slot| slot.start == monday_at(10, 0)));

        let record = h.scheduler.get_appointment(id).await.unwrap();
        assert_eq!(record.status, AppointmentStatus::Cancelled);
        assert_eq!(
            record.notes.as_deref(),
            Some("bring forms\n\nCancellation reason: client sick")
        );

        assert_eq!(h.worker.drain().await, 3);
        let events = h.recorder.events.lock().await;
        assert_eq!(events[0].1["action"], "status-updated");
        assert_eq!(events[0].1["status"], "CANCELLED");

        // Rebooking the freed slot works.
        h.scheduler.book_appointment(request_at(10, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_without_prior_notes() {
        let h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        h.scheduler.cancel_appointment(id, "schedule conflict").await.unwrap();
        let record = h.scheduler.get_appointment(id).await.unwrap();
        assert_eq!(record.notes.as_deref(), Some("Cancellation reason: schedule conflict"));
    }

    #[tokio::test]
    async fn reschedule_into_taken_slot_leaves_both_unchanged() {
        let h = harness().await;
        let a = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        let b = h.scheduler.book_appointment(request_at(11, 0)).await.unwrap();
        h.scheduler.update_status(b, AppointmentStatus::Confirmed).await.unwrap();
        let a_before = h.scheduler.get_appointment(a).await.unwrap();
        let b_before = h.scheduler.get_appointment(b).await.unwrap();

        let err = h
            .scheduler
            .reschedule_appointment(b, monday_at(9, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Collision { .. }));
        assert_eq!(h.scheduler.get_appointment(a).await.unwrap(), a_before);
        assert_eq!(h.scheduler.get_appointment(b).await.unwrap(), b_before);
    }

    #[tokio::test]
    async fn reschedule_resets_to_pending_and_may_overlap_itself() {
        let mut h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        h.scheduler.update_status(id, AppointmentStatus::Confirmed).await.unwrap();
        h.worker.drain().await;

        // Shifting by half an hour overlaps only the appointment's own slot.
        h.scheduler.reschedule_appointment(id, monday_at(9, 30)).await.unwrap();
        let record = h.scheduler.get_appointment(id).await.unwrap();
        assert_eq!(record.status, AppointmentStatus::Pending);
        assert_eq!(record.date_time, monday_at(9, 30));

        assert_eq!(h.worker.drain().await, 3);
        let events = h.recorder.events.lock().await;
        assert_eq!(events[0].1["action"], "rescheduled");
        assert!(events[0].1["dateTime"].is_string());
    }

    #[tokio::test]
    async fn reschedule_into_the_past_is_invalid() {
        let h = harness_at(monday_at(10, 0)).await;
        let id = h.scheduler.book_appointment(request_at(11, 0)).await.unwrap();
        let err = h
            .scheduler
            .reschedule_appointment(id, monday_at(9, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn status_update_to_paid_marks_payment() {
        let mut h = harness().await;
        let id = h
            .scheduler
            .book_appointment(request_at(9, 0).with_amount(3000))
            .await
            .unwrap();
        h.worker.drain().await;

        h.scheduler.update_status_str(id, "paid").await.unwrap();
        let record = h.scheduler.get_appointment(id).await.unwrap();
        assert_eq!(record.status, AppointmentStatus::Paid);
        assert_eq!(record.payment_status, PaymentStatus::Paid);

        assert_eq!(h.worker.drain().await, 3);
        let events = h.recorder.events.lock().await;
        assert_eq!(events[0].1["status"], "PAID");
    }

    #[tokio::test]
    async fn unknown_status_string_is_rejected() {
        let h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        let err = h.scheduler.update_status_str(id, "archived").await.unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidArgument(_)));
        assert_eq!(
            h.scheduler.get_appointment(id).await.unwrap().status,
            AppointmentStatus::Pending
        );
    }

    #[tokio::test]
    async fn reviving_a_cancelled_appointment_checks_its_slot() {
        let h = harness().await;
        let first = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        h.scheduler.cancel_appointment(first, "").await.unwrap();
        let second = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();

        let err = h
            .scheduler
            .update_status(first, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Collision { .. }));

        h.scheduler.update_status(second, AppointmentStatus::Rejected).await.unwrap();
        h.scheduler.update_status(first, AppointmentStatus::Confirmed).await.unwrap();
    }

    #[tokio::test]
    async fn meeting_link_publishes_without_notifying() {
        let mut h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        h.worker.drain().await;
        h.recorder.notifications.lock().await.clear();

        h.scheduler
            .update_meeting_link(id, "https://meet.example.com/room-7")
            .await
            .unwrap();
        assert_eq!(
            h.scheduler.get_appointment(id).await.unwrap().meeting_link.as_deref(),
            Some("https://meet.example.com/room-7")
        );

        assert_eq!(h.worker.drain().await, 1);
        assert!(h.recorder.notifications.lock().await.is_empty());
        let events = h.recorder.events.lock().await;
        assert_eq!(events.last().unwrap().1["field"], "meetingLink");
        assert_eq!(events.last().unwrap().1["action"], "updated");
    }

    #[tokio::test]
    async fn malformed_meeting_link_is_rejected() {
        let h = harness().await;
        let id = h.scheduler.book_appointment(request_at(9, 0)).await.unwrap();
        for link in ["", "meet.example.com", "ftp://files", "https://", "https://a b"] {
            let err = h.scheduler.update_meeting_link(id, link).await.unwrap_err();
            assert!(matches!(err, SchedulingError::InvalidArgument(_)), "{link}");
        }
    }

    #[tokio::test]
    async fn unknown_appointment_is_not_found() {
        let h = harness().await;
        let missing = Uuid::new_v4();
        let results = [
            h.scheduler.update_status(missing, AppointmentStatus::Confirmed).await,
            h.scheduler.cancel_appointment(missing, "gone").await,
            h.scheduler.reschedule_appointment(missing, monday_at(9, 0)).await,
            h.scheduler
                .update_meeting_link(missing, "https://meet.example.com/x")
                .await,
        ];
        for result in results {
            assert!(matches!(
                result,
                Err(SchedulingError::NotFound { entity: "Appointment", .. })
            ));
        }
    }
}
