//! Collision detection over half-open intervals.
//!
//! The same predicate backs both the read-time availability filter and the
//! write-time re-check in booking and rescheduling.

use crate::models::{Appointment, AppointmentId, Interval};

/// Whether `candidate` overlaps any of `existing`.
///
/// Status-agnostic: callers pass only intervals that still hold a slot.
pub fn overlaps(candidate: &Interval, existing: &[Interval]) -> bool {
    existing.iter().any(|interval| candidate.overlaps_with(interval))
}

/// The first active appointment overlapping `candidate`, ignoring `exclude`.
pub fn find_conflict<'a>(
    candidate: &Interval,
    appointments: &'a [Appointment],
    exclude: Option<AppointmentId>,
) -> Option<&'a Appointment> {
    appointments
        .iter()
        .filter(|appointment| appointment.is_active())
        .filter(|appointment| Some(appointment.id) != exclude)
        .find(|appointment| overlaps(candidate, &[appointment.interval()]))
}

/// Intervals of the appointments that still occupy their slot.
pub fn active_intervals(appointments: &[Appointment]) -> Vec<Interval> {
    appointments
        .iter()
        .filter(|appointment| appointment.is_active())
        .map(Appointment::interval)
        .collect()
}
