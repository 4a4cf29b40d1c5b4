/// Calendar arithmetic and the injectable clock
///
/// Business logic never reads the system time directly. It asks a [`Clock`]
/// for the current instant and a [`Calendar`] for calendar-day boundaries in
/// the deployment's time zone.
///
/// Due dates are stored as instants normalized to the start of their calendar
/// day, so "the day after tomorrow" is always the inclusive window
/// `[start_of_day(d), end_of_day(d)]`.
///
/// # Example
///
/// ```
/// use advocate_shared::calendar::{Calendar, Clock, FixedClock};
/// use chrono::{NaiveDate, TimeZone, Utc};
///
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 3, 0, 0).unwrap());
/// let calendar = Calendar::from_offset_minutes(330).unwrap(); // Asia/Kolkata
///
/// let today = calendar.today(&clock);
/// assert_eq!(today, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
///
/// let window = calendar.day_window(calendar.add_days(today, 2));
/// assert!(window.start < window.end);
/// ```

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Returns the current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same instant, so a test can hand one clone to the code
/// under test and advance time through another.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Moves the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Inclusive bounds of one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayWindow {
    /// The calendar day (deployment time zone)
    pub date: NaiveDate,

    /// First instant of the day
    pub start: DateTime<Utc>,

    /// Last instant of the day (millisecond precision)
    pub end: DateTime<Utc>,
}

impl DayWindow {
    /// Checks whether `instant` falls inside the window, bounds included
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Calendar-day arithmetic in a fixed time zone
///
/// Only a constant UTC offset is modelled. Zones with daylight saving time
/// are approximated by their current offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    /// Creates a calendar for the given UTC offset
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Creates a calendar from an offset in minutes east of UTC
    ///
    /// Returns `None` when the offset is outside ±24 hours.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    /// Calendar in UTC
    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// The configured UTC offset
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar day that contains `instant`
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Today's date according to `clock`
    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.date_of(clock.now())
    }

    /// Adds (or subtracts) whole days
    pub fn add_days(&self, date: NaiveDate, days: i64) -> NaiveDate {
        date + Duration::days(days)
    }

    /// Local date and time-of-day converted to a UTC instant
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// First instant of `date`
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at(date, NaiveTime::MIN)
    }

    /// Last instant of `date` (one millisecond before the next day starts)
    pub fn end_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.start_of_day(self.add_days(date, 1)) - Duration::milliseconds(1)
    }

    /// Inclusive window covering all of `date`
    pub fn day_window(&self, date: NaiveDate) -> DayWindow {
        DayWindow {
            date,
            start: self.start_of_day(date),
            end: self.end_of_day(date),
        }
    }

    /// Whole calendar days from `from` to `to` (negative when `to` is earlier)
    pub fn days_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        (to - from).num_days()
    }

    /// First instant strictly after `after` whose local time is `time`
    pub fn next_occurrence(&self, after: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
        let candidate = self.at(self.date_of(after), time);
        if candidate > after {
            candidate
        } else {
            self.at(self.add_days(self.date_of(after), 1), time)
        }
    }

    /// Parses a due date given as `YYYY-MM-DD` or RFC 3339
    ///
    /// RFC 3339 inputs are converted to the calendar day they fall on in this
    /// calendar's time zone.
    pub fn parse_date(&self, input: &str) -> Option<NaiveDate> {
        let input = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Some(date);
        }
        DateTime::parse_from_rfc3339(input)
            .ok()
            .map(|dt| self.date_of(dt.with_timezone(&Utc)))
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> Calendar {
        Calendar::from_offset_minutes(330).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_today_respects_offset() {
        // 20:00 UTC on the 9th is already the 10th in IST
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 9, 20, 0, 0).unwrap());
        assert_eq!(ist().today(&clock), date(2026, 3, 10));
        assert_eq!(Calendar::utc().today(&clock), date(2026, 3, 9));
    }

    #[test]
    fn test_day_window_bounds() {
        let window = ist().day_window(date(2026, 3, 12));
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 11, 18, 30, 0).unwrap());
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2026, 3, 12, 18, 29, 59).unwrap() + Duration::milliseconds(999)
        );
        assert!(window.contains(window.start));
        assert!(window.contains(window.end));
        assert!(!window.contains(window.end + Duration::milliseconds(1)));
        assert!(!window.contains(window.start - Duration::milliseconds(1)));
    }

    #[test]
    fn test_next_occurrence() {
        let calendar = ist();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        // 08:00 IST -> 09:00 IST same day
        let before = calendar.at(date(2026, 3, 10), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(calendar.next_occurrence(before, nine), calendar.at(date(2026, 3, 10), nine));

        // Exactly 09:00 IST -> next day
        let exact = calendar.at(date(2026, 3, 10), nine);
        assert_eq!(calendar.next_occurrence(exact, nine), calendar.at(date(2026, 3, 11), nine));
    }

    #[test]
    fn test_parse_date_formats() {
        let calendar = ist();
        assert_eq!(calendar.parse_date("2026-04-01"), Some(date(2026, 4, 1)));
        assert_eq!(calendar.parse_date(" 2026-04-01 "), Some(date(2026, 4, 1)));
        // 20:00 UTC is the next day in IST
        assert_eq!(
            calendar.parse_date("2026-04-01T20:00:00Z"),
            Some(date(2026, 4, 2))
        );
        assert_eq!(calendar.parse_date("01/04/2026"), None);
        assert_eq!(calendar.parse_date(""), None);
    }

    #[test]
    fn test_fixed_clock_shared_between_clones() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let other = clock.clone();
        other.advance(Duration::days(2));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_offset() {
        assert!(Calendar::from_offset_minutes(24 * 60).is_none());
        assert!(Calendar::from_offset_minutes(-330).is_some());
    }
}
