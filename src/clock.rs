//! Wall-clock access behind a trait so the scheduler, engine and planner
//! can be driven with a scripted clock in tests.
//!
//! All civil-time reasoning in the daemon (snapshot names, `HH:MM`
//! firing times, bucket boundaries) happens in local naive time; the
//! only conversion point from the epoch seconds ZFS reports is
//! [`Clock::from_epoch`].

use std::cell::Cell;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};

pub trait Clock {
    /// Current instant in local civil time.
    fn now(&self) -> NaiveDateTime;

    /// Convert an epoch-seconds value (as printed by `zfs get -p`) to
    /// local civil time.
    fn from_epoch(&self, epoch: i64) -> NaiveDateTime;
}

/// The real local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn from_epoch(&self, epoch: i64) -> NaiveDateTime {
        DateTime::from_timestamp(epoch, 0)
            .map(|utc| utc.with_timezone(&Local).naive_local())
            .unwrap_or_default()
    }
}

/// A settable clock for tests. Epochs are interpreted as UTC so test
/// fixtures are independent of the host timezone.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.now.set(now);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now.get()
    }

    fn from_epoch(&self, epoch: i64) -> NaiveDateTime {
        DateTime::from_timestamp(epoch, 0)
            .map(|utc| utc.naive_utc())
            .unwrap_or_default()
    }
}

/// Drop sub-minute precision. Snapshot names carry minute resolution, so
/// the engine and planner agree on one reference instant per tick.
pub fn snap_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
