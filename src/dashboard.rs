//! Creation-count charts for the moderator dashboard.
//!
//! Buckets are calendar days and weeks in a fixed UTC offset: the last seven
//! days ending today, and four rolling seven-day windows ending today.

use chrono::{DateTime, Datelike as _, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChartData {
    pub last_7_days_labels: Vec<String>,
    pub last_7_days_data: Vec<usize>,
    pub last_4_weeks_labels: Vec<String>,
    pub last_4_weeks_data: Vec<usize>,
}

/// The earliest instant any bucket of [`chart`] can cover.
pub fn window_start(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let today = now.with_timezone(&offset).date_naive();
    local_midnight(today - TimeDelta::days(27), offset)
}

/// Bucket `timestamps` by day and by week, relative to `now`.
pub fn chart(timestamps: &[DateTime<Utc>], now: DateTime<Utc>, offset: FixedOffset) -> ChartData {
    let today = now.with_timezone(&offset).date_naive();
    let count = |start: DateTime<Utc>, end: DateTime<Utc>| {
        timestamps.iter().filter(|t| **t >= start && **t < end).count()
    };

    let mut data = ChartData::default();

    for i in (0..7).rev() {
        let day = today - TimeDelta::days(i);
        let start = local_midnight(day, offset);

        data.last_7_days_labels.push(day.format("%d/%m").to_string());
        data.last_7_days_data.push(count(start, start + TimeDelta::days(1)));
    }

    for i in (0..4).rev() {
        let first_day = today - TimeDelta::days(i * 7 + 6);
        let start = local_midnight(first_day, offset);

        data.last_4_weeks_labels.push(format!("Week {}", week_of_year(first_day)));
        data.last_4_weeks_data.push(count(start, start + TimeDelta::days(7)));
    }

    data
}

/// Week number where week 1 holds January 1st and weeks start on Monday.
pub fn week_of_year(date: NaiveDate) -> u32 {
    let jan1_offset = date
        .with_ordinal(1)
        .map_or(0, |jan1| jan1.weekday().num_days_from_monday());
    (date.ordinal0() + jan1_offset) / 7 + 1
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    (date.and_time(NaiveTime::MIN) - TimeDelta::seconds(i64::from(offset.local_minus_utc())))
        .and_utc()
}
