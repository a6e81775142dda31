//! Due-time predicate per dataset.
//!
//! A clock dataset fires when one of its `HH:MM` occurrences falls in
//! the window `(previous tick, now]`; several missed occurrences
//! coalesce into one firing. A trigger dataset fires on the presence
//! of its trigger file. Dataset order follows the configuration file.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};

use crate::config::{DatasetConfig, FireSpec};
use crate::trigger;

pub struct Scheduler {
    previous: HashMap<String, NaiveDateTime>,
}

impl Scheduler {
    /// `hysteresis` backdates the initial window so an occurrence that
    /// passed moments before startup still fires on the first tick.
    pub fn new(datasets: &[DatasetConfig], start: NaiveDateTime, hysteresis: Duration) -> Self {
        let backdated = start
            - chrono::Duration::from_std(hysteresis).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            previous: datasets
                .iter()
                .map(|cfg| (cfg.dataset.clone(), backdated))
                .collect(),
        }
    }

    /// Names of the datasets due at `now`, in configuration order.
    pub fn due(&mut self, datasets: &[DatasetConfig], now: NaiveDateTime) -> Vec<String> {
        let mut fired = Vec::new();
        for cfg in datasets {
            if !cfg.is_active() {
                continue;
            }
            let previous = self.previous.entry(cfg.dataset.clone()).or_insert(now);
            let due = match &cfg.when {
                FireSpec::Trigger => trigger::is_pending(cfg.mountpoint.as_deref()),
                FireSpec::Times(times) => crossed(times, *previous, now),
            };
            *previous = now;
            if due {
                fired.push(cfg.dataset.clone());
            }
        }
        fired
    }
}

/// Did any occurrence of `times` fall within `(previous, now]`?
fn crossed(times: &[NaiveTime], previous: NaiveDateTime, now: NaiveDateTime) -> bool {
    if now <= previous {
        return false;
    }
    let mut date = previous.date();
    loop {
        for time in times {
            let occurrence = date.and_time(*time);
            if occurrence > previous && occurrence <= now {
                return true;
            }
        }
        if date >= now.date() {
            return false;
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => return false,
        }
    }
}
