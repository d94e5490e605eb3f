use crate::rule::Period;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Extra slots kept beyond the window so a bucket is not reused while a
/// slightly late request may still address it.
const SPARE_SLOTS: usize = 10;

/// A time windowed counter. Buckets are one second wide whatever the period;
/// the period decides how many trailing buckets make up the window.
pub trait RateCounter: Send + Sync {
    fn name(&self) -> &str;

    fn period(&self) -> Period;

    /// Adds `count` to the bucket of `timestamp` and returns the bucket total.
    fn add(&self, timestamp: i64, count: i64) -> i64;

    /// Adds `count` only if the window total stays within `up_limit`.
    /// A negative `up_limit` means unlimited.
    fn try_add(&self, timestamp: i64, count: i64, up_limit: i64) -> bool;

    fn minus(&self, timestamp: i64, count: i64);

    /// Window total ending at the bucket of `timestamp`.
    fn get_count(&self, timestamp: i64) -> i64;
}

pub trait RateCountCreator: Send + Sync {
    fn name(&self) -> &str;

    fn create_rate_count(&self, name: &str, period: Period) -> Arc<dyn RateCounter>;
}

fn second_of(timestamp: i64) -> u32 {
    timestamp.div_euclid(1000) as u32
}

fn pack(second: u32, count: u32) -> u64 {
    ((second as u64) << 32) | count as u64
}

fn unpack(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

fn clamp_count(count: i64) -> u32 {
    count.clamp(0, u32::MAX as i64) as u32
}

/// Ring of one-second buckets. Each slot packs `(second, count)` into one
/// `AtomicU64` so rollover and increment happen in a single CAS.
pub struct LocalSimpleCountRateCounter {
    name: String,
    period: Period,
    slots: Vec<AtomicU64>,
}

impl LocalSimpleCountRateCounter {
    pub fn new(name: impl Into<String>, period: Period) -> Self {
        let size = period.window_secs() as usize + SPARE_SLOTS;
        Self {
            name: name.into(),
            period,
            slots: (0..size).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn slot(&self, second: u32) -> &AtomicU64 {
        &self.slots[second as usize % self.slots.len()]
    }

    /// Sum of the window buckets ending at `second`, without the bucket of
    /// `second` itself.
    fn previous_buckets(&self, second: u32) -> i64 {
        let current = second as i64;
        let oldest = current - self.period.window_secs();
        self.slots
            .iter()
            .map(|slot| unpack(slot.load(Ordering::Acquire)))
            .filter(|(s, _)| {
                let s = *s as i64;
                s < current && s > oldest
            })
            .map(|(_, c)| c as i64)
            .sum()
    }

    /// Applies `update` to the count of `second`'s bucket, resetting a stale
    /// bucket first. Returns `None` when `update` declines or when the slot
    /// already holds a newer second.
    fn update_bucket<F>(&self, second: u32, update: F) -> Option<u32>
    where
        F: Fn(u32) -> Option<u32>,
    {
        let slot = self.slot(second);
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let (slot_second, count) = unpack(current);
            let base = if slot_second == second {
                count
            } else if slot_second < second {
                0
            } else {
                return None;
            };

            let next = update(base)?;
            match slot.compare_exchange_weak(
                current,
                pack(second, next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }
}

impl RateCounter for LocalSimpleCountRateCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn period(&self) -> Period {
        self.period
    }

    fn add(&self, timestamp: i64, count: i64) -> i64 {
        let delta = clamp_count(count);
        self.update_bucket(second_of(timestamp), |base| {
            Some(base.saturating_add(delta))
        })
        .map(|total| total as i64)
        .unwrap_or(0)
    }

    fn try_add(&self, timestamp: i64, count: i64, up_limit: i64) -> bool {
        if up_limit < 0 {
            self.add(timestamp, count);
            return true;
        }

        let second = second_of(timestamp);
        let previous = self.previous_buckets(second);
        let delta = clamp_count(count);
        let Some(total) = self.update_bucket(second, |base| {
            if previous + base as i64 + delta as i64 <= up_limit {
                Some(base.saturating_add(delta))
            } else {
                None
            }
        }) else {
            return false;
        };

        // earlier buckets are read outside the CAS; a late add to one of them
        // may have landed in between
        if self.period.window_secs() > 1
            && self.previous_buckets(second) + total as i64 > up_limit
        {
            self.minus(timestamp, count);
            return false;
        }
        true
    }

    fn minus(&self, timestamp: i64, count: i64) {
        let second = second_of(timestamp);
        let delta = clamp_count(count);
        let slot = self.slot(second);
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let (slot_second, value) = unpack(current);
            // the bucket rolled over, nothing left to give back
            if slot_second != second {
                return;
            }
            match slot.compare_exchange_weak(
                current,
                pack(second, value.saturating_sub(delta)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn get_count(&self, timestamp: i64) -> i64 {
        let second = second_of(timestamp);
        let (slot_second, count) = unpack(self.slot(second).load(Ordering::Acquire));
        let current = if slot_second == second { count as i64 } else { 0 };
        self.previous_buckets(second) + current
    }
}

#[derive(Debug, Default)]
pub struct LocalRateCountCreator;

impl RateCountCreator for LocalRateCountCreator {
    fn name(&self) -> &str {
        crate::config::LOCAL_CREATOR
    }

    fn create_rate_count(&self, name: &str, period: Period) -> Arc<dyn RateCounter> {
        Arc::new(LocalSimpleCountRateCounter::new(name, period))
    }
}
