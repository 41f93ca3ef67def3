//! Provider calendars: the recurring weekly schedule, blocked dates, and
//! candidate slot generation.
//!
//! Schedules are expressed in provider-local wall-clock time. Each provider
//! carries a fixed UTC offset used to anchor local times to instants.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::SchedulingError;
use crate::models::Interval;

const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// A window of working hours within one day, `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, SchedulingError> {
        let range = TimeRange { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Build a range from whole hours and minutes, e.g. `(9, 0)` to `(12, 30)`.
    pub fn from_hm(start: (u32, u32), end: (u32, u32)) -> Result<Self, SchedulingError> {
        let start = NaiveTime::from_hms_opt(start.0, start.1, 0).ok_or_else(|| {
            SchedulingError::InvalidArgument(format!("Invalid start time {:02}:{:02}", start.0, start.1))
        })?;
        let end = NaiveTime::from_hms_opt(end.0, end.1, 0).ok_or_else(|| {
            SchedulingError::InvalidArgument(format!("Invalid end time {:02}:{:02}", end.0, end.1))
        })?;
        TimeRange::new(start, end)
    }

    fn validate(&self) -> Result<(), SchedulingError> {
        if self.start >= self.end {
            return Err(SchedulingError::InvalidArgument(format!(
                "Time range start {} must be before end {}",
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )));
        }
        Ok(())
    }
}

/// Availability template for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day_of_week: Weekday,
    pub active: bool,
    pub time_ranges: Vec<TimeRange>,
}

impl DaySchedule {
    pub fn active(day_of_week: Weekday, time_ranges: Vec<TimeRange>) -> Self {
        DaySchedule {
            day_of_week,
            active: true,
            time_ranges,
        }
    }

    pub fn inactive(day_of_week: Weekday) -> Self {
        DaySchedule {
            day_of_week,
            active: false,
            time_ranges: Vec::new(),
        }
    }
}

/// Recurring weekly schedule plus dates the provider is fully unavailable.
///
/// Overlapping ranges within one day are accepted; they yield overlapping
/// candidates which the collision check sorts out at booking time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAvailability {
    pub weekly_schedule: Vec<DaySchedule>,
    pub blocked_dates: BTreeSet<NaiveDate>,
}

impl ProviderAvailability {
    pub fn new(weekly_schedule: Vec<DaySchedule>) -> Result<Self, SchedulingError> {
        let availability = ProviderAvailability {
            weekly_schedule,
            blocked_dates: BTreeSet::new(),
        };
        availability.validate()?;
        Ok(availability)
    }

    /// One entry per weekday, every range well-formed.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        let mut seen = HashSet::new();
        for day in &self.weekly_schedule {
            if !seen.insert(day.day_of_week) {
                return Err(SchedulingError::InvalidArgument(format!(
                    "Duplicate schedule entry for {}",
                    day.day_of_week
                )));
            }
            for range in &day.time_ranges {
                range.validate()?;
            }
        }
        Ok(())
    }

    pub fn day(&self, weekday: Weekday) -> Option<&DaySchedule> {
        self.weekly_schedule
            .iter()
            .find(|day| day.day_of_week == weekday)
    }

    /// Replace the entry for the day's weekday, or add it.
    pub fn set_day(&mut self, day: DaySchedule) -> Result<(), SchedulingError> {
        for range in &day.time_ranges {
            range.validate()?;
        }
        match self
            .weekly_schedule
            .iter_mut()
            .find(|existing| existing.day_of_week == day.day_of_week)
        {
            Some(existing) => *existing = day,
            None => self.weekly_schedule.push(day),
        }
        Ok(())
    }

    pub fn block_date(&mut self, date: NaiveDate) -> bool {
        self.blocked_dates.insert(date)
    }

    pub fn is_blocked(&self, date: NaiveDate) -> bool {
        self.blocked_dates.contains(&date)
    }
}

/// A provider as seen by the scheduling engine.
///
/// The offset is fixed; daylight saving transitions are not modeled, so a
/// provider in a DST zone must have the offset updated when it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    /// Minutes east of UTC.
    pub utc_offset_minutes: i32,
    pub availability: ProviderAvailability,
}

impl Provider {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        utc_offset_minutes: i32,
        availability: ProviderAvailability,
    ) -> Result<Self, SchedulingError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SchedulingError::InvalidArgument(
                "Provider ID cannot be empty".to_string(),
            ));
        }
        let provider = Provider {
            id,
            display_name: display_name.into(),
            utc_offset_minutes,
            availability,
        };
        provider.offset()?;
        provider.availability.validate()?;
        Ok(provider)
    }

    pub fn offset(&self) -> Result<FixedOffset, SchedulingError> {
        if self.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(SchedulingError::InvalidArgument(format!(
                "UTC offset of {} minutes is out of range",
                self.utc_offset_minutes
            )));
        }
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            SchedulingError::InvalidArgument(format!(
                "UTC offset of {} minutes is out of range",
                self.utc_offset_minutes
            ))
        })
    }

    /// The provider-local calendar date of an instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> Result<NaiveDate, SchedulingError> {
        let shift = Duration::seconds(i64::from(self.offset()?.local_minus_utc()));
        instant
            .naive_utc()
            .checked_add_signed(shift)
            .map(|local| local.date())
            .ok_or_else(|| {
                SchedulingError::InvalidArgument(format!("Instant {} is out of range", instant))
            })
    }
}

fn to_utc(offset: FixedOffset, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    local
        .checked_sub_signed(Duration::seconds(i64::from(offset.local_minus_utc())))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The instants bounding a provider-local day, `[midnight, next midnight)`.
///
/// Dates whose day cannot be expressed as UTC instants are rejected.
pub fn local_day_bounds(
    offset: FixedOffset,
    date: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), SchedulingError> {
    to_utc(offset, date.and_time(NaiveTime::MIN))
        .and_then(|start| Some((start, start.checked_add_signed(Duration::days(1))?)))
        .ok_or_else(|| SchedulingError::InvalidArgument(format!("Date {} is out of range", date)))
}

/// Generate the candidate slots for one provider-local date.
///
/// Walks every time range of the day's schedule in `duration_minutes` steps,
/// keeping only slots that end within the range. Blocked, inactive and
/// unscheduled days produce nothing. Past slots are not filtered here.
pub fn generate_candidate_slots(
    availability: &ProviderAvailability,
    offset: FixedOffset,
    date: NaiveDate,
    duration_minutes: u32,
) -> Vec<Interval> {
    if duration_minutes == 0 || availability.is_blocked(date) {
        return Vec::new();
    }

    let day = match availability.day(date.weekday()) {
        Some(day) if day.active => day,
        _ => return Vec::new(),
    };

    let step = Duration::minutes(i64::from(duration_minutes));
    let mut slots = Vec::new();

    for range in &day.time_ranges {
        let mut cursor = date.and_time(range.start);
        let range_end = date.and_time(range.end);

        while let Some(next) = cursor.checked_add_signed(step).filter(|next| *next <= range_end) {
            if let (Some(start), Some(end)) = (to_utc(offset, cursor), to_utc(offset, next)) {
                slots.push(Interval { start, end });
            }
            cursor = next;
        }
    }

    slots
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Provider({}, days={}, blocked={})",
            self.display_name,
            self.availability
                .weekly_schedule
                .iter()
                .filter(|day| day.active)
                .count(),
            self.availability.blocked_dates.len()
        )
    }
}
