use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockTimeError {
    #[error("invalid clock time {0:?}, expected HH:MM")]
    Format(String),
    #[error("clock time {hour:02}:{minute:02} is out of range")]
    OutOfRange { hour: u32, minute: u32 },
}

/// A wall-clock time of day that recurs every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ClockTimeError> {
        if hour > 23 || minute > 59 {
            return Err(ClockTimeError::OutOfRange { hour, minute });
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(self) -> u32 {
        self.hour as u32
    }

    pub fn minute(self) -> u32 {
        self.minute as u32
    }

    fn as_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }

    /// The instant this clock time names on `date` in `tz`.
    pub fn on_date<Z: TimeZone>(self, date: NaiveDate, tz: &Z) -> Option<DateTime<Utc>> {
        resolve_local(tz, date.and_time(self.as_naive()))
    }

    /// The first occurrence strictly after `now`: today if still ahead,
    /// otherwise tomorrow.
    pub fn next_after<Z: TimeZone>(self, now: DateTime<Utc>, tz: &Z) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(tz).date_naive();
        for day_offset in 0..=1 {
            let date = today + Duration::days(day_offset);
            if let Some(candidate) = self.on_date(date, tz) {
                if candidate > now {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = ClockTimeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let format_error = || ClockTimeError::Format(raw.to_string());

        let (hour, minute) = raw.trim().split_once(':').ok_or_else(format_error)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(hour) || hour.len() > 2 || !digits(minute) || minute.len() != 2 {
            return Err(format_error());
        }

        let hour = hour.parse::<u32>().map_err(|_| format_error())?;
        let minute = minute.parse::<u32>().map_err(|_| format_error())?;
        Self::new(hour, minute)
    }
}

// Ambiguous local times (clocks falling back) take the earlier instant.
// Local times skipped by a forward jump are pushed an hour later.
fn resolve_local<Z: TimeZone>(tz: &Z, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// The persisted timer schedule: two unordered lists of "HH:MM" entries.
///
/// Entries are stored verbatim; malformed ones are only rejected when the
/// next event is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSchedule {
    #[serde(rename = "time_on_entries", default)]
    pub turn_on_times: Vec<String>,
    #[serde(rename = "time_off_entries", default)]
    pub turn_off_times: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampAction {
    TurnOn,
    TurnOff,
}

impl LampAction {
    pub fn target_state(self) -> bool {
        matches!(self, Self::TurnOn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "on",
            Self::TurnOff => "off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntry {
    pub entry: String,
    pub error: ClockTimeError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NextEvents {
    pub turn_on: Option<DateTime<Utc>>,
    pub turn_off: Option<DateTime<Utc>>,
}

impl NextEvents {
    /// The event to wait for. Events not strictly after `now` are ignored,
    /// and "off" wins when both land on the same instant.
    pub fn earliest(&self, now: DateTime<Utc>) -> Option<(LampAction, DateTime<Utc>)> {
        let on = self.turn_on.filter(|at| *at > now);
        let off = self.turn_off.filter(|at| *at > now);
        match (on, off) {
            (Some(on), Some(off)) if on < off => Some((LampAction::TurnOn, on)),
            (_, Some(off)) => Some((LampAction::TurnOff, off)),
            (Some(on), None) => Some((LampAction::TurnOn, on)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    pub events: NextEvents,
    pub invalid: Vec<InvalidEntry>,
}

impl TimerSchedule {
    pub fn new(turn_on_times: Vec<String>, turn_off_times: Vec<String>) -> Self {
        Self {
            turn_on_times,
            turn_off_times,
        }
    }

    pub fn plan<Z: TimeZone>(&self, now: DateTime<Utc>, tz: &Z) -> SchedulePlan {
        let mut invalid = Vec::new();
        let turn_on = soonest(&self.turn_on_times, now, tz, &mut invalid);
        let turn_off = soonest(&self.turn_off_times, now, tz, &mut invalid);
        SchedulePlan {
            events: NextEvents { turn_on, turn_off },
            invalid,
        }
    }
}

/// The soonest instant after `now` named by any entry in `entries`.
/// Entries that fail to parse are appended to `invalid` and skipped.
pub fn soonest<Z: TimeZone>(
    entries: &[String],
    now: DateTime<Utc>,
    tz: &Z,
    invalid: &mut Vec<InvalidEntry>,
) -> Option<DateTime<Utc>> {
    let mut best: Option<DateTime<Utc>> = None;

    for entry in entries {
        let time = match entry.parse::<ClockTime>() {
            Ok(time) => time,
            Err(error) => {
                invalid.push(InvalidEntry {
                    entry: entry.clone(),
                    error,
                });
                continue;
            }
        };

        let Some(candidate) = time.next_after(now, tz) else {
            continue;
        };

        if best.map(|current| candidate < current).unwrap_or(true) {
            best = Some(candidate);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use chrono_tz::{America::Vancouver, Tz};
    use pretty_assertions::assert_eq;

    use super::*;

    fn local(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Vancouver
            .with_ymd_and_hms(2026, month, day, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entries(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn plan(on: &[&str], off: &[&str], now: DateTime<Utc>, tz: &Tz) -> SchedulePlan {
        TimerSchedule::new(entries(on), entries(off)).plan(now, tz)
    }

    #[test]
    fn parses_clock_times() {
        assert_eq!("07:05".parse::<ClockTime>().unwrap(), ClockTime::new(7, 5).unwrap());
        assert_eq!("7:05".parse::<ClockTime>().unwrap(), ClockTime::new(7, 5).unwrap());
        assert_eq!(" 23:59 ".parse::<ClockTime>().unwrap().to_string(), "23:59");
        assert_eq!("00:00".parse::<ClockTime>().unwrap().to_string(), "00:00");
    }

    #[test]
    fn rejects_malformed_clock_times() {
        assert_eq!(
            "25:99".parse::<ClockTime>(),
            Err(ClockTimeError::OutOfRange {
                hour: 25,
                minute: 99
            })
        );
        for raw in ["", "7", "ab:cd", "07:5", "07:050", "123:00", "-1:00", "07:00:00"] {
            assert!(
                matches!(raw.parse::<ClockTime>(), Err(ClockTimeError::Format(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn entry_earlier_than_now_rolls_to_tomorrow() {
        let now = local(6, 15, 10, 0);
        let plan = plan(&["09:00"], &["11:00"], now, &Vancouver);

        assert_eq!(plan.events.turn_on, Some(local(6, 16, 9, 0)));
        assert_eq!(plan.events.turn_off, Some(local(6, 15, 11, 0)));
        assert_eq!(
            plan.events.earliest(now),
            Some((LampAction::TurnOff, local(6, 15, 11, 0)))
        );
    }

    #[test]
    fn picks_soonest_entry_in_list() {
        let now = local(6, 15, 19, 0);
        let plan = plan(&["08:00", "20:00"], &[], now, &Vancouver);

        assert_eq!(plan.events.turn_on, Some(local(6, 15, 20, 0)));
        assert_eq!(plan.events.turn_off, None);
    }

    #[test]
    fn entry_equal_to_now_is_tomorrow() {
        let now = local(6, 15, 20, 0);
        let plan = plan(&["20:00"], &[], now, &Vancouver);

        assert_eq!(plan.events.turn_on, Some(local(6, 16, 20, 0)));
    }

    #[test]
    fn empty_lists_have_no_events() {
        let now = local(6, 15, 12, 0);
        let plan = plan(&[], &[], now, &Vancouver);

        assert_eq!(plan.events, NextEvents::default());
        assert_eq!(plan.events.earliest(now), None);
        assert!(plan.invalid.is_empty());
    }

    #[test]
    fn malformed_entry_does_not_hide_valid_ones() {
        let now = local(6, 15, 12, 0);
        let plan = plan(&["25:99", "13:30"], &["nope"], now, &Vancouver);

        assert_eq!(plan.events.turn_on, Some(local(6, 15, 13, 30)));
        assert_eq!(plan.events.turn_off, None);
        assert_eq!(
            plan.invalid
                .iter()
                .map(|invalid| invalid.entry.as_str())
                .collect::<Vec<_>>(),
            vec!["25:99", "nope"]
        );
    }

    #[test]
    fn off_wins_tie() {
        let now = local(6, 15, 12, 0);
        let plan = plan(&["18:00"], &["18:00"], now, &Vancouver);

        assert_eq!(
            plan.events.earliest(now),
            Some((LampAction::TurnOff, local(6, 15, 18, 0)))
        );
    }

    #[test]
    fn earliest_ignores_events_not_after_now() {
        let now = local(6, 15, 12, 0);
        let events = NextEvents {
            turn_on: Some(now),
            turn_off: Some(local(6, 15, 11, 0)),
        };

        assert_eq!(events.earliest(now), None);
    }

    #[test]
    fn spring_forward_gap_moves_an_hour_later() {
        // 2026-03-08 02:00 PST jumps to 03:00 PDT in Vancouver.
        let now = local(3, 8, 1, 0);
        let plan = plan(&["02:30"], &[], now, &Vancouver);

        assert_eq!(plan.events.turn_on, Some(local(3, 8, 3, 30)));
    }

    #[test]
    fn fall_back_fold_takes_earliest_instant() {
        // 2026-11-01 01:30 happens twice; the PDT one comes first.
        let now = Utc.with_ymd_and_hms(2026, 11, 1, 7, 0, 0).unwrap();
        let plan = plan(&[], &["01:30"], now, &Vancouver);

        assert_eq!(
            plan.events.turn_off,
            Some(Utc.with_ymd_and_hms(2026, 11, 1, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn persisted_layout_uses_entry_keys() {
        let schedule = TimerSchedule::new(entries(&["07:00"]), entries(&["23:30"]));
        let json = serde_json::to_value(&schedule).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "time_on_entries": ["07:00"],
                "time_off_entries": ["23:30"],
            })
        );

        let partial: TimerSchedule = serde_json::from_str(r#"{"time_on_entries":["06:15"]}"#).unwrap();
        assert_eq!(partial, TimerSchedule::new(entries(&["06:15"]), Vec::new()));
    }
}
