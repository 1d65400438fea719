//! Date-window helpers for the three sync kinds. `range` chunks into weekly
//! windows exactly as `month` does, per the resolved range-sync Open
//! Question — both funnel through `slice_into_weeks`.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use common::error::AppError;

/// The Monday-Sunday ISO week window containing the given year/week number.
pub fn week_range(year: i32, week: u32) -> Result<(NaiveDate, NaiveDate), AppError> {
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
        .ok_or_else(|| AppError::Validation(format!("invalid ISO week {week} of {year}")))?;
    let sunday = monday
        .checked_add_signed(Duration::days(6))
        .ok_or_else(|| AppError::Validation("week range overflow".into()))?;
    Ok((monday, sunday))
}

/// First and last calendar day of the given year/month.
pub fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), AppError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Validation(format!("invalid month {month} of {year}")))?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| AppError::Validation("month range overflow".into()))?;
    let last = next_first
        .pred_opt()
        .ok_or_else(|| AppError::Validation("month range underflow".into()))?;
    Ok((first, last))
}

/// Chunks an inclusive `[start, end]` range into consecutive 7-day windows,
/// clipping the final window to `end`. Grounded in `original_source`'s
/// `_get_week_ranges`.
#[must_use]
pub fn slice_into_weeks(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    if start > end {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let window_end = (cursor + Duration::days(6)).min(end);
        windows.push((cursor, window_end));
        let Some(next) = window_end.succ_opt() else {
            break;
        };
        cursor = next;
    }
    windows
}

/// Renders a date in the `YYYY-MM-DD` form the upstream API expects.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_range_spans_monday_to_sunday() {
        let (start, end) = week_range(2026, 5).unwrap();
        assert_eq!(start.weekday(), Weekday::Mon);
        assert_eq!(end.weekday(), Weekday::Sun);
        assert_eq!((end - start).num_days(), 6);
    }

    #[test]
    fn month_range_covers_full_calendar_month() {
        let (start, end) = month_range(2026, 2).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn month_range_handles_december_rollover() {
        let (start, end) = month_range(2026, 12).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
    }

    #[test]
    fn slice_into_weeks_covers_whole_range_without_overlap() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let windows = slice_into_weeks(start, end);
        assert_eq!(windows.first().unwrap().0, start);
        assert_eq!(windows.last().unwrap().1, end);
        for pair in windows.windows(2) {
            assert_eq!(pair[1].0, pair[0].1.succ_opt().unwrap());
        }
    }

    #[test]
    fn slice_into_weeks_clips_final_window() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 1, 3).unwrap();
        let windows = slice_into_weeks(start, end);
        assert_eq!(windows, vec![(start, end)]);
    }
}
