//! Counter reconciliation across device reboots.
//!
//! Hardware packet/byte counters grow monotonically until the device
//! restarts, at which point they reset to a small value. Summing raw
//! deltas across a reset would undercount or go negative; this module
//! recovers the true lifetime total and exposes the reset count as a
//! reliability signal.

use std::ops::{Add, Sub};

/// A counter value that can be reconciled: integers sum exactly, floats
/// with the usual floating-point semantics.
pub trait CounterValue:
    Copy + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Default
{
}

impl CounterValue for i64 {}
impl CounterValue for f64 {}

/// A timestamped counter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample<T> {
    pub ts: i64,
    pub value: T,
}

impl<T> CounterSample<T> {
    pub const fn new(ts: i64, value: T) -> Self {
        Self { ts, value }
    }
}

/// Compute the cumulative increase over a counter series, handling reboots.
///
/// Iterates adjacent pairs. A non-negative delta is normal growth and is
/// added to the total. A negative delta means the counter reset: the
/// post-reboot reading itself is the increase since the reset, so that
/// value is added and the reboot count incremented. A negative total is
/// impossible by construction.
///
/// Returns `(None, 0)` for fewer than two samples; no delta is computable.
///
/// Samples must already be sorted ascending by timestamp. That is a
/// caller contract, checked only in debug builds; out-of-order input in
/// release builds yields an unspecified numeric result.
pub fn counter_total<T: CounterValue>(samples: &[CounterSample<T>]) -> (Option<T>, u32) {
    debug_assert!(
        samples.windows(2).all(|w| w[0].ts <= w[1].ts),
        "counter samples must be sorted by timestamp"
    );

    if samples.len() < 2 {
        return (None, 0);
    }

    let mut total = T::default();
    let mut reboots = 0u32;

    for pair in samples.windows(2) {
        let (prev, curr) = (pair[0].value, pair[1].value);
        if curr >= prev {
            total = total + (curr - prev);
        } else {
            // Counter reset: count the climb from zero to the new reading.
            total = total + curr;
            reboots += 1;
        }
    }

    (Some(total), reboots)
}
