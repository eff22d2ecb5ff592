//! Next-occurrence calculation for recurring tasks.
//!
//! Dates are plain calendar dates; weekday indices run 0 (Sunday) to 6
//! (Saturday).

use chrono::{Datelike, Days, Months, NaiveDate};
use tracing::warn;

use crate::model::Recurrence;

/// Whether completing a task with this rule rolls it forward.
pub fn should_recur(recurrence: &Recurrence) -> bool {
    !matches!(recurrence, Recurrence::None)
}

/// Compute the next due date after `current` for the given rule.
///
/// `none` and unknown rules return `current` unchanged. Month and year steps
/// clamp to the last day of the target month.
pub fn calculate_next_date(
    current: NaiveDate,
    recurrence: &Recurrence,
    week_days: &[u8],
) -> NaiveDate {
    match recurrence {
        Recurrence::None => current,
        Recurrence::Daily => add_days(current, 1),
        Recurrence::Weekly => add_days(current, 7),
        Recurrence::CustomWeekly => next_selected_weekday(current, week_days),
        Recurrence::Monthly => add_months(current, 1),
        Recurrence::Yearly => add_months(current, 12),
        Recurrence::Unknown(raw) => {
            warn!(recurrence = %raw, date = %current, "unknown recurrence type; date unchanged");
            current
        }
    }
}

fn next_selected_weekday(current: NaiveDate, week_days: &[u8]) -> NaiveDate {
    let mut selected: Vec<u32> = week_days
        .iter()
        .filter(|day| **day <= 6)
        .map(|day| u32::from(*day))
        .collect();
    selected.sort_unstable();
    selected.dedup();

    let Some(&first) = selected.first() else {
        return add_days(current, 7);
    };

    let today = current.weekday().num_days_from_sunday();
    match selected.iter().find(|day| **day > today) {
        Some(&later) => add_days(current, u64::from(later - today)),
        None => add_days(current, u64::from(7 - today + first)),
    }
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(date)
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}
