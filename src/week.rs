//! Tag-week calendar math.
//!
//! All weeks are anchored to Sunday 23:59:00 UTC. A tag-week runs from one
//! anchor to the next; two instants belong to the same tag-week iff
//! [`week_start`] agrees on them. The ledger engine and the rotation
//! scheduler both derive their week key from a group's `next_tag_switch_at`
//! via [`current_week_start`], so the two can never disagree about which
//! week "now" belongs to.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};

/// Length of one tag-week.
pub fn week_length() -> Duration {
    Duration::days(7)
}

fn anchor_time() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).expect("valid anchor time")
}

/// The most recent weekly anchor (Sunday 23:59:00 UTC) at or before `instant`.
pub fn week_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    let date = instant.date_naive();
    let days_back = date.weekday().num_days_from_sunday() as i64;
    let candidate = (date - Duration::days(days_back))
        .and_time(anchor_time())
        .and_utc();
    if candidate > instant {
        candidate - week_length()
    } else {
        candidate
    }
}

/// The next weekly anchor strictly after `instant`.
pub fn next_rotation_after(instant: DateTime<Utc>) -> DateTime<Utc> {
    week_start(instant) + week_length()
}

/// The start of the tag-week currently in progress for a group whose next
/// rotation deadline is `next_tag_switch_at`: step back one week from the
/// upcoming switch and normalize to the week boundary.
pub fn current_week_start(next_tag_switch_at: DateTime<Utc>) -> DateTime<Utc> {
    week_start(next_tag_switch_at - week_length())
}
