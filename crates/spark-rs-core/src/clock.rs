//! Time source and local-day arithmetic.
//!
//! Sparks are stamped in UTC but batches are scoped to the user's local
//! calendar day. Every range query converts local midnight and the following
//! local midnight to UTC instants, so a day is the half-open window
//! `[midnight, next midnight)`.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use spark_rs_store::DayWindow;

/// Longest daylight-saving gap searched when local midnight does not exist.
const MAX_GAP_MINUTES: i64 = 3 * 60;

/// Source of the current instant and the local calendar.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Local calendar date of `instant`.
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate;

    /// UTC window covering the local calendar `date`.
    fn day_window(&self, date: NaiveDate) -> DayWindow;

    /// Today's local date.
    fn today(&self) -> NaiveDate {
        self.local_date(self.now())
    }

    /// UTC window for today.
    fn today_window(&self) -> DayWindow {
        self.day_window(self.today())
    }
}

/// Wall clock in the device's local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&Local).date_naive()
    }

    fn day_window(&self, date: NaiveDate) -> DayWindow {
        day_window_in(&Local, date)
    }
}

/// Window for `date` in time zone `tz`.
pub fn day_window_in<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DayWindow {
    let next = date.succ_opt().unwrap_or(date);
    DayWindow {
        start: local_midnight(tz, date),
        end: local_midnight(tz, next),
    }
}

/// First valid instant of `date` in `tz`.
///
/// Ambiguous midnights resolve to the earlier instant; skipped midnights
/// resolve to the first local time after the gap.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    for minutes in 0..=MAX_GAP_MINUTES {
        let candidate: NaiveDateTime = midnight + Duration::minutes(minutes);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(instant) => return instant.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => continue,
        }
    }
    midnight.and_utc()
}
