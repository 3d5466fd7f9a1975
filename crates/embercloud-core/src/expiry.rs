// Wall-clock expiry arithmetic shared by the credential session and the
// broker lease.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// `start + seconds`, saturating at the far future.
pub(crate) fn expiry_from(start: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Validity left at `now`; zero once expired.
pub(crate) fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// A missing grant, or one within `margin` of expiry, must be renewed.
pub(crate) fn needs_renewal(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    margin: Duration,
) -> bool {
    expires_at.is_none_or(|at| remaining(at, now) < margin)
}
