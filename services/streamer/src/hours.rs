//! Regular-trading-hours filter
//!
//! Official candles for exchange-session instruments only include ticks
//! inside the regular session: 09:30–16:00 America/New_York, Monday–Friday.
//! Holidays are not checked here; holiday ticks (if the vendor emits any)
//! are rare enough to ignore. Always-on classes (crypto) bypass the filter.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use types::asset::AssetClass;

/// Session open, exchange-local (hour, minute).
const SESSION_OPEN: (u32, u32) = (9, 30);
/// Session close, exchange-local (hour, minute), exclusive.
const SESSION_CLOSE: (u32, u32) = (16, 0);

/// Whether a UTC timestamp falls within U.S. equities regular trading hours.
pub fn is_regular_hours(ts: DateTime<Utc>) -> bool {
    let local = ts.with_timezone(&New_York);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = (local.hour(), local.minute());
    t >= SESSION_OPEN && t < SESSION_CLOSE
}

/// Whether a tick at `ts` should enter official candles for this class.
pub fn admits(class: AssetClass, ts: DateTime<Utc>) -> bool {
    !class.session_bound() || is_regular_hours(ts)
}
