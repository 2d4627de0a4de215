use std::time::Duration;

use chrono::{DateTime, Utc};

/// `time + duration`, saturating instead of overflowing.
pub(crate) fn add_duration(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `time - duration`, saturating at the earliest representable instant.
pub(crate) fn sub_duration(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Time left from `now` until `deadline`, zero when already passed.
pub(crate) fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn arithmetic_saturates() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(add_duration(t, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(sub_duration(t, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            remaining(t, add_duration(t, Duration::from_millis(250))),
            Duration::from_millis(250)
        );
        assert_eq!(remaining(t, sub_duration(t, Duration::from_secs(1))), Duration::ZERO);
    }
}
