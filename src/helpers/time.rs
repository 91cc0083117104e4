use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::utils::constants::EXPIRY_SAFETY_MARGIN_SECONDS;

/// Expiry recorded for a token the server says lives `expires_in_seconds` from `issued_at`.
/// The safety margin keeps the next rotation ahead of the real expiry.
/// `None` when the reported lifetime is not finite or the result leaves chrono's range.
pub fn token_expiry(issued_at: DateTime<Utc>, expires_in_seconds: f64) -> Option<DateTime<Utc>> {
    if !expires_in_seconds.is_finite() {
        return None;
    }
    let lifetime = (expires_in_seconds.trunc() as i64).checked_sub(EXPIRY_SAFETY_MARGIN_SECONDS)?;
    issued_at.checked_add_signed(Duration::try_seconds(lifetime)?)
}

/// Midnight of the calendar day `instant` falls on, in the instant's own timezone.
/// Falls back to `instant` when that midnight does not exist (DST gap).
pub fn start_of_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = instant.timezone();
    instant
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .unwrap_or_else(|| instant.clone())
}

pub fn now_i64() -> i64 {
    Utc::now().timestamp()
}
