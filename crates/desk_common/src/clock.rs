//! Injectable clock pinned to one civil timezone.
//!
//! Month boundaries are always evaluated in the same fixed offset, so the
//! engine never mixes UTC and local readings.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::{Mutex, PoisonError};

use crate::error::{QuotaError, QuotaResult};
use crate::month::Month;

/// Asia/Colombo, which has no daylight saving.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn offset(&self) -> FixedOffset {
        *self.now().offset()
    }

    fn current_month(&self) -> Month {
        Month::from_datetime(&self.now())
    }
}

pub fn offset_from_minutes(minutes: i32) -> QuotaResult<FixedOffset> {
    FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
        QuotaError::InvalidConfig(format!("utc offset of {} minutes is out of range", minutes))
    })
}

/// Wall clock read in a fixed civil offset.
#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn from_offset_minutes(minutes: i32) -> QuotaResult<Self> {
        Ok(Self::new(offset_from_minutes(minutes)?))
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock reading noon on the given day of `month`, in `offset`.
    pub fn at_month(month: Month, day: u32, offset: FixedOffset) -> Self {
        let start = month.start_utc(offset) + Duration::days(day.saturating_sub(1) as i64);
        Self::new((start + Duration::hours(12)).with_timezone(&offset))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_keeps_offset() {
        let clock = SystemClock::from_offset_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap();
        assert_eq!(clock.now().offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn test_fixed_clock_at_month() {
        let offset = offset_from_minutes(330).unwrap();
        let june: Month = "2024-06".parse().unwrap();
        let clock = FixedClock::at_month(june, 1, offset);
        assert_eq!(clock.current_month(), june);

        clock.advance(Duration::days(30));
        assert_eq!(clock.current_month().to_string(), "2024-07");
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(offset_from_minutes(24 * 60).is_err());
    }
}
