// =============================================================================
// Session filter — UTC trading-hour recommendation
// =============================================================================
//
// Perp venues trade around the clock, but liquidity does not. The filter
// never blocks on its own; only `Avoid` stops a tick, and only when the user
// has the session filter enabled.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAdvice {
    Trade,
    Caution,
    Avoid,
}

/// Session recommendation for an instant in time.
///
/// - Friday 21:00 UTC onward: week-close books thin out fast -> Avoid.
/// - Weekends: reduced liquidity -> Caution.
/// - Weekday 21:00-23:59 UTC and Monday 00:00-01:59: rollover lull -> Caution.
/// - Everything else -> Trade.
pub fn session_advice(at: DateTime<Utc>) -> SessionAdvice {
    let weekday = at.weekday();
    let hour = at.hour();

    match weekday {
        Weekday::Fri if hour >= 21 => SessionAdvice::Avoid,
        Weekday::Sat | Weekday::Sun => SessionAdvice::Caution,
        Weekday::Mon if hour < 2 => SessionAdvice::Caution,
        _ if hour >= 21 => SessionAdvice::Caution,
        _ => SessionAdvice::Trade,
    }
}

/// Convenience over epoch milliseconds.
pub fn session_advice_ms(ts_ms: i64) -> SessionAdvice {
    match chrono::TimeZone::timestamp_millis_opt(&Utc, ts_ms).single() {
        Some(at) => session_advice(at),
        None => SessionAdvice::Caution,
    }
}
