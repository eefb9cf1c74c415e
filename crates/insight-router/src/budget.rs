//! Shared spend budget.

use std::sync::atomic::{AtomicU64, Ordering};

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

fn to_micros(dollars: f64) -> u64 {
    (dollars.max(0.0) * MICROS_PER_DOLLAR).round() as u64
}

fn to_dollars(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_DOLLAR
}

/// Remaining spend, counted in micro-dollars.
///
/// Reservations are compare-and-swap decrements, so concurrent callers can
/// never drive the total below zero.
#[derive(Debug)]
pub struct CostBudget {
    total: u64,
    remaining: AtomicU64,
}

impl CostBudget {
    pub fn new(dollars: f64) -> Self {
        let total = to_micros(dollars);
        Self {
            total,
            remaining: AtomicU64::new(total),
        }
    }

    /// Reserve `dollars`. Returns false, reserving nothing, if the remaining
    /// budget does not cover it.
    pub fn try_spend(&self, dollars: f64) -> bool {
        let cost = to_micros(dollars);
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(cost))
            .is_ok()
    }

    /// Return a reservation whose call never delivered an answer.
    pub fn refund(&self, dollars: f64) {
        let cost = to_micros(dollars);
        let total = self.total;
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                Some(left.saturating_add(cost).min(total))
            });
    }

    pub fn remaining(&self) -> f64 {
        to_dollars(self.remaining.load(Ordering::Acquire))
    }

    pub fn spent(&self) -> f64 {
        to_dollars(self.total - self.remaining.load(Ordering::Acquire))
    }

    pub fn total(&self) -> f64 {
        to_dollars(self.total)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }
}
