//! Recurring schedules and due-window matching.
//!
//! Schedules fire at a fixed UTC hour/minute on a set of weekdays. A periodic
//! external trigger asks on a fixed cadence which schedules are due, widened
//! by a window so a late tick does not drop fires near the boundary.
//!
//! The window is one combined weekday/hour/minute predicate, not three
//! independent range checks: a window opening at Saturday 23:55 runs into
//! hour 0 of Sunday, and treating the three fields separately would silently
//! skip (or double-fire) every schedule sitting on the boundary.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use strata_core::{DocumentKind, Filter, PartitionKey, ProjectId, ScheduleId};

use crate::error::{Error, Result};
use crate::model::{DocumentModel, DocumentValidator};
use crate::store::DocumentStore;

/// Day of the week, in the persisted wire form.
///
/// Kept separate from `chrono::Weekday` so the JSON representation used in
/// query filters is fixed by this crate, not by a dependency's serde
/// implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
    /// Sunday.
    Sunday,
}

impl DayOfWeek {
    /// All days, Monday first.
    pub const ALL: [Self; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    /// The following day, wrapping Sunday to Monday.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Monday => Self::Tuesday,
            Self::Tuesday => Self::Wednesday,
            Self::Wednesday => Self::Thursday,
            Self::Thursday => Self::Friday,
            Self::Friday => Self::Saturday,
            Self::Saturday => Self::Sunday,
            Self::Sunday => Self::Monday,
        }
    }

    /// The preceding day, wrapping Monday to Sunday.
    #[must_use]
    pub const fn prev(self) -> Self {
        match self {
            Self::Monday => Self::Sunday,
            Self::Tuesday => Self::Monday,
            Self::Wednesday => Self::Tuesday,
            Self::Thursday => Self::Wednesday,
            Self::Friday => Self::Thursday,
            Self::Saturday => Self::Friday,
            Self::Sunday => Self::Saturday,
        }
    }

    /// The wire form, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }
}

impl From<chrono::Weekday> for DayOfWeek {
    fn from(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }
}

/// A project-scoped recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Unique schedule ID.
    pub id: ScheduleId,
    /// Owning project; determines the partition.
    pub project_id: ProjectId,
    /// Human-readable name.
    pub name: String,
    /// Weekdays the schedule fires on.
    pub days_of_week: BTreeSet<DayOfWeek>,
    /// Fire hour, UTC, 0-23.
    pub utc_hour: u8,
    /// Fire minute, 0-59.
    pub utc_minute: u8,
    /// Disabled schedules never match.
    pub enabled: bool,
    /// Whether the schedule re-arms after firing. One-shot schedules are
    /// disabled by their trigger after the first fire.
    pub recurring: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DocumentModel for Schedule {
    const KIND: DocumentKind = DocumentKind::Schedule;

    fn document_id(&self) -> String {
        self.id.to_string()
    }

    fn partition_key(&self) -> PartitionKey {
        PartitionKey::project(&self.project_id)
    }
}

/// Field-range validation for schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleValidator;

impl DocumentValidator<Schedule> for ScheduleValidator {
    fn validate(&self, doc: &Schedule) -> Result<()> {
        if doc.name.trim().is_empty() {
            return Err(Error::validation("schedule name cannot be empty"));
        }
        if doc.utc_hour > 23 {
            return Err(Error::validation(format!(
                "utcHour {} is out of range (0-23)",
                doc.utc_hour
            )));
        }
        if doc.utc_minute > 59 {
            return Err(Error::validation(format!(
                "utcMinute {} is out of range (0-59)",
                doc.utc_minute
            )));
        }
        Ok(())
    }
}

/// A point in the weekly cycle: weekday plus UTC hour and minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInstant {
    /// Day of the week.
    pub weekday: DayOfWeek,
    /// Hour, UTC, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
}

impl TickInstant {
    /// Extracts the weekly-cycle position of a UTC timestamp.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            weekday: at.weekday().into(),
            hour: at.hour() as u8,
            minute: at.minute() as u8,
        }
    }

    /// Steps the instant backwards by up to one day's worth of minutes.
    #[must_use]
    pub fn rewind(self, minutes: u32) -> Self {
        let total = u32::from(self.hour) * 60 + u32::from(self.minute);
        let (weekday, total) = if minutes <= total {
            (self.weekday, total - minutes)
        } else {
            (self.weekday.prev(), total + 1440 - minutes.min(1440))
        };
        Self {
            weekday,
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        }
    }
}

/// Builds the predicate matching enabled schedules whose fire time falls in
/// `[start, start + width_minutes)`.
///
/// The window is treated as one combined weekday/hour/minute constraint.
/// When the minute range spills past 59 the hour branch carries it, and when
/// the window opens in hour 23 the spill lands in hour 0 of the *next*
/// weekday. `width_minutes` is capped at 60; a zero width matches the start
/// minute exactly.
#[must_use]
pub fn due_filter(start: TickInstant, width_minutes: u32) -> Filter {
    let enabled = Filter::eq("enabled", true);
    let width = i64::from(width_minutes.min(60));
    let hour = i64::from(start.hour);
    let minute = i64::from(start.minute);
    let day = start.weekday.as_str();

    if width == 0 {
        return Filter::and([
            enabled,
            Filter::contains("daysOfWeek", day),
            Filter::eq("utcHour", hour),
            Filter::eq("utcMinute", minute),
        ]);
    }

    let wrap = minute + width > 59;
    if !wrap {
        return Filter::and([
            enabled,
            Filter::contains("daysOfWeek", day),
            Filter::eq("utcHour", hour),
            Filter::Gte("utcMinute".into(), minute),
            Filter::Lt("utcMinute".into(), minute + width),
        ]);
    }

    let spill = (minute + width) % 60;
    if start.hour == 23 {
        // The window crosses midnight: the spill belongs to hour 0 of the
        // next weekday, so the weekday constraint moves inside the branches.
        Filter::and([
            enabled,
            Filter::or([
                Filter::and([
                    Filter::contains("daysOfWeek", day),
                    Filter::eq("utcHour", 23),
                    Filter::Gte("utcMinute".into(), minute),
                ]),
                Filter::and([
                    Filter::contains("daysOfWeek", start.weekday.next().as_str()),
                    Filter::eq("utcHour", 0),
                    Filter::Lt("utcMinute".into(), spill),
                ]),
            ]),
        ])
    } else {
        Filter::and([
            enabled,
            Filter::contains("daysOfWeek", day),
            Filter::or([
                Filter::and([
                    Filter::eq("utcHour", hour),
                    Filter::Gte("utcMinute".into(), minute),
                ]),
                Filter::and([
                    Filter::eq("utcHour", hour + 1),
                    Filter::Lt("utcMinute".into(), spill),
                ]),
            ]),
        ])
    }
}

/// Finds schedules due to run at a given instant.
#[derive(Debug, Clone)]
pub struct RecurrenceMatcher {
    store: DocumentStore<Schedule>,
}

impl RecurrenceMatcher {
    /// Creates a matcher over the given schedule store.
    #[must_use]
    pub fn new(store: DocumentStore<Schedule>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &DocumentStore<Schedule> {
        &self.store
    }

    /// Returns every enabled schedule due at `instant`.
    ///
    /// A schedule is due when its fire time falls inside the trailing window
    /// `[instant - window_minutes, instant]` — the widening covers fire
    /// times a late tick would otherwise have skipped, including windows
    /// that wrap across an hour or day boundary. A zero window matches the
    /// instant's minute exactly. `window_minutes` is capped at 59.
    #[tracing::instrument(skip(self), fields(kind = %DocumentKind::Schedule))]
    pub async fn find_due(
        &self,
        partition: &PartitionKey,
        instant: TickInstant,
        window_minutes: u32,
    ) -> Result<Vec<Schedule>> {
        let window = window_minutes.min(59);
        let filter = if window == 0 {
            due_filter(instant, 0)
        } else {
            // Anchor the window at its oldest covered minute; +1 keeps the
            // instant itself inside the half-open width.
            due_filter(instant.rewind(window), window + 1)
        };

        let due = self
            .store
            .query_all(partition, &filter)
            .await?
            .into_iter()
            .map(|versioned| versioned.document)
            .collect();
        Ok(due)
    }
}
