//! Quota window tracking — rolling hour/day action counters per account.
//!
//! Pure state transitions, no I/O. The slot scheduler drives these with its
//! cursor timestamp; persistence happens later, in one conditional write.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Rolling-window usage counters for a legacy-model account.
///
/// Invariant: at the instant a gated slot is assigned, `used_this_hour <=
/// hourly_limit` and `used_this_day <= daily_limit` (checked pre-increment).
/// `version` is the optimistic-concurrency counter for the store write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub hourly_limit: u32,
    pub daily_limit: u32,
    pub used_this_hour: u32,
    pub used_this_day: u32,
    pub hour_started_at: DateTime<Utc>,
    pub day_started_at: DateTime<Utc>,
    pub version: i64,
}

impl QuotaState {
    /// Fresh state with zero usage, windows anchored at `now`.
    pub fn new(hourly_limit: u32, daily_limit: u32, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            hourly_limit,
            daily_limit,
            used_this_hour: 0,
            used_this_day: 0,
            hour_started_at: truncate_to_hour(now, offset),
            day_started_at: midnight_utc(local_date(now, offset), offset),
            version: 0,
        }
    }

    /// Roll the hour and day windows forward to cover `cursor`.
    ///
    /// Crossing an offset-local midnight resets both counters; an elapsed
    /// hour window resets only the hourly counter. Both anchors land on
    /// clean boundaries (top of hour, local midnight) so repeated rolls are
    /// stable.
    pub fn roll(&mut self, cursor: DateTime<Utc>, offset: FixedOffset) {
        if cursor - self.hour_started_at >= Duration::hours(1) {
            self.used_this_hour = 0;
            self.hour_started_at = truncate_to_hour(cursor, offset);
        }
        let cursor_date = local_date(cursor, offset);
        if cursor_date > local_date(self.day_started_at, offset) {
            self.used_this_day = 0;
            self.used_this_hour = 0;
            self.day_started_at = midnight_utc(cursor_date, offset);
        }
    }

    pub fn hour_exhausted(&self) -> bool {
        self.used_this_hour >= self.hourly_limit
    }

    pub fn day_exhausted(&self) -> bool {
        self.used_this_day >= self.daily_limit
    }

    /// Count one gated action against both windows.
    pub fn consume(&mut self) {
        self.used_this_hour += 1;
        self.used_this_day += 1;
    }
}

/// Quota shape of a sending account.
///
/// Legacy accounts carry persisted rolling-window state; accounts on the
/// newer model expose no counters and behave as unlimited. Modeling the
/// split as a variant keeps the account-shape branching in one place
/// instead of scattered `is_new_account` checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountQuota {
    Legacy(QuotaState),
    Unlimited,
}

impl AccountQuota {
    /// Where a fresh schedule starts: never earlier than the current hour
    /// window, so a new job cannot be scheduled retroactively into it.
    pub fn default_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            AccountQuota::Unlimited => now,
            AccountQuota::Legacy(q) => now.max(q.hour_started_at),
        }
    }

    /// Advance `cursor` to the next slot the quota permits, rolling windows
    /// as the cursor moves. Identity for unlimited accounts.
    ///
    /// Caller contract: legacy limits are >= 1 (validated before
    /// scheduling); a zero limit would never yield a slot.
    pub fn next_free_slot(&mut self, mut cursor: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let AccountQuota::Legacy(q) = self else {
            return cursor;
        };
        loop {
            q.roll(cursor, offset);
            if q.hour_exhausted() {
                cursor = q.hour_started_at + Duration::hours(1);
                continue;
            }
            if q.day_exhausted() {
                let next_day = local_date(cursor, offset).succ_opt().unwrap_or(local_date(cursor, offset));
                cursor = midnight_utc(next_day, offset);
                continue;
            }
            return cursor;
        }
    }

    /// Count one gated action. No-op for unlimited accounts.
    pub fn consume(&mut self) {
        if let AccountQuota::Legacy(q) = self {
            q.consume();
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, AccountQuota::Legacy(_))
    }
}

/// Calendar date of `t` in the day-boundary offset.
pub(crate) fn local_date(t: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    t.with_timezone(&offset).date_naive()
}

/// UTC instant of midnight starting `date` in the day-boundary offset.
pub(crate) fn midnight_utc(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = date.and_time(NaiveTime::MIN);
    DateTime::<Utc>::from_naive_utc_and_offset(
        local_midnight - Duration::seconds(offset.local_minus_utc() as i64),
        Utc,
    )
}

/// `t` truncated to the top of its hour in the day-boundary offset.
pub(crate) fn truncate_to_hour(t: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = t.with_timezone(&offset);
    let trunc = local
        .with_minute(0)
        .and_then(|x| x.with_second(0))
        .and_then(|x| x.with_nanosecond(0))
        .unwrap_or(local);
    trunc.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn state(hourly: u32, daily: u32, anchor: DateTime<Utc>) -> QuotaState {
        QuotaState::new(hourly, daily, anchor, utc_offset())
    }

    #[test]
    fn test_hour_window_rolls_and_truncates() {
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut q = state(5, 50, anchor);
        q.used_this_hour = 5;
        q.used_this_day = 5;

        // 10:42 is past the window; the new anchor is 10:00 sharp.
        let cursor = Utc.with_ymd_and_hms(2026, 3, 1, 10, 42, 17).unwrap();
        q.roll(cursor, utc_offset());
        assert_eq!(q.used_this_hour, 0);
        assert_eq!(q.used_this_day, 5); // same day, day counter untouched
        assert_eq!(q.hour_started_at, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_day_rollover_resets_both_counters() {
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        let mut q = state(5, 50, anchor);
        q.used_this_hour = 3;
        q.used_this_day = 40;

        let cursor = Utc.with_ymd_and_hms(2026, 3, 2, 0, 10, 0).unwrap();
        q.roll(cursor, utc_offset());
        assert_eq!(q.used_this_day, 0);
        assert_eq!(q.used_this_hour, 0);
        assert_eq!(q.day_started_at, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_day_boundary_honors_offset() {
        // UTC+7: local midnight is 17:00 UTC of the previous day.
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let mut q = QuotaState::new(5, 50, anchor, offset);
        q.used_this_day = 50;

        // 18:00 UTC on Mar 1 is already Mar 2 at UTC+7 — the day rolled.
        let cursor = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        q.roll(cursor, offset);
        assert_eq!(q.used_this_day, 0);
        assert_eq!(
            q.day_started_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_free_slot_skips_exhausted_hour() {
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut q = state(2, 50, anchor);
        q.used_this_hour = 2;
        let mut quota = AccountQuota::Legacy(q);

        let cursor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let slot = quota.next_free_slot(cursor, utc_offset());
        assert_eq!(slot, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_next_free_slot_skips_exhausted_day() {
        let anchor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut q = state(10, 3, anchor);
        q.used_this_day = 3;
        let mut quota = AccountQuota::Legacy(q);

        let cursor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let slot = quota.next_free_slot(cursor, utc_offset());
        assert_eq!(slot, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_unlimited_never_gates() {
        let mut quota = AccountQuota::Unlimited;
        let cursor = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(quota.next_free_slot(cursor, utc_offset()), cursor);
        quota.consume(); // no-op, must not panic
        assert_eq!(quota, AccountQuota::Unlimited);
    }

    #[test]
    fn test_default_start_not_before_hour_window() {
        let hour_start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let quota = AccountQuota::Legacy(state(5, 50, hour_start));

        let before = Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 0).unwrap();
        assert_eq!(quota.default_start(before), hour_start);

        let after = Utc.with_ymd_and_hms(2026, 3, 1, 9, 45, 0).unwrap();
        assert_eq!(quota.default_start(after), after);
    }
}
