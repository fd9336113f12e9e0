use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use super::model::ScheduleSpec;
use crate::error::RunnerError;

/// Parses `HH:MM` (24h).
pub fn parse_time_of_day(text: &str) -> Result<NaiveTime, RunnerError> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .map_err(|_| RunnerError::validation(format!("invalid time of day `{text}`, want HH:MM")))
}

fn at_local(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_time(time) - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&naive)
}

/// Next fire time strictly after `now` for recurring kinds.
///
/// Weekly picks the smallest offset `d` in `0..=7` whose weekday is selected
/// and whose time is still ahead, so a slot that already passed today
/// comes back exactly one week later when it is the only day selected.
pub fn compute_next_run(
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, RunnerError> {
    let today = now.with_timezone(&offset).date_naive();
    match spec {
        ScheduleSpec::Once { at } => Ok(at.unwrap_or(now)),
        ScheduleSpec::Interval { minutes } => {
            if *minutes == 0 {
                return Err(RunnerError::validation("interval must be at least 1 minute"));
            }
            Ok(now + Duration::minutes(i64::from(*minutes)))
        }
        ScheduleSpec::Daily { time } => {
            let time = parse_time_of_day(time)?;
            let candidate = at_local(today, time, offset);
            if candidate > now {
                Ok(candidate)
            } else {
                Ok(at_local(today + Duration::days(1), time, offset))
            }
        }
        ScheduleSpec::Weekly { time, days_of_week } => {
            let time = parse_time_of_day(time)?;
            (0..=7)
                .map(|d| today + Duration::days(d))
                .filter(|date| {
                    let weekday = date.weekday().num_days_from_sunday() as u8;
                    days_of_week.contains(&weekday)
                })
                .map(|date| at_local(date, time, offset))
                .find(|candidate| *candidate > now)
                .ok_or_else(|| RunnerError::validation("weekly schedule selects no valid weekday"))
        }
    }
}
