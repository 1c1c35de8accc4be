use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone};

/// Longest DST gap we walk across when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 180;

/// Resolve `time` to the next instant in `now`'s time zone strictly after `now`.
///
/// Today's occurrence is used when it is still in the future; a time equal to
/// or before `now` rolls over to the same wall-clock time tomorrow, so the
/// result never produces a zero or negative delay.
///
/// Returns `None` only if the calendar overflows.
pub fn next_fire_at<Tz: TimeZone>(now: &DateTime<Tz>, time: NaiveTime) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();

    let candidate = resolve_local(&tz, today.and_time(time))?;
    if candidate > *now {
        return Some(candidate);
    }

    // Today's window has passed, advance to tomorrow.
    let tomorrow = today.succ_opt()?;
    resolve_local(&tz, tomorrow.and_time(time))
}

/// Map a wall-clock time to an instant. Ambiguous times (DST fall-back) take
/// the earlier instant; skipped times (DST spring-forward) take the first
/// valid minute after the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => (1..=MAX_GAP_MINUTES)
            .find_map(|m| tz.from_local_datetime(&(naive + Duration::minutes(m))).earliest()),
    }
}
