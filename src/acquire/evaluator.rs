//! # Fix Evaluator
//!
//! Decides when a stream of raw position samples has settled into a
//! trustworthy fix, and when an attempt has run out of time. Pure state, no
//! clock of its own: the worker passes elapsed attempt time in.

use std::time::Duration;

use crate::config::LocationConfig;
use crate::point::LocationPoint;
use crate::response::ModemFault;

/// Consecutive good decodes required before a fix is trusted.
pub(crate) const SETTLING_FIX_COUNT: u32 = 2;

/// Per-attempt fix evaluation state.
#[derive(Debug)]
pub(crate) struct FixEvaluator {
    hdop_limit: f32,
    hacc_limit: f32,
    max_fix_time: Duration,
    fix_count: u32,
    first_fix: Option<Duration>,
}

impl FixEvaluator {
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            hdop_limit: config.hdop_threshold.clamp(0, 100) as f32,
            hacc_limit: config.hacc_threshold,
            max_fix_time: Duration::from_secs(config.max_fix_seconds),
            fix_count: 0,
            first_fix: None,
        }
    }

    /// Record the decode result of one poll cycle. Returns true when this is
    /// the first successful decode of the attempt, so the caller can snapshot
    /// the system time.
    ///
    /// A missed sample leaves the count where it is; only decoded fixes move
    /// it.
    pub fn note_poll(&mut self, fault: ModemFault, elapsed: Duration) -> bool {
        if fault != ModemFault::Fix {
            return false;
        }

        self.fix_count += 1;
        if self.first_fix.is_none() {
            self.first_fix = Some(elapsed);
            return true;
        }
        false
    }

    /// Whether the current cycle completes a settled, within-threshold fix.
    /// Both threshold comparisons are inclusive.
    pub fn settled(&self, fault: ModemFault, point: &LocationPoint) -> bool {
        fault == ModemFault::Fix
            && self.fix_count >= SETTLING_FIX_COUNT
            && point.horizontal_dop <= self.hdop_limit
            && point.horizontal_accuracy <= self.hacc_limit
    }

    /// Whether the attempt has used up its fix-time budget.
    pub fn timed_out(&self, elapsed: Duration) -> bool {
        elapsed >= self.max_fix_time
    }

    /// Seconds from attempt start to the first decoded fix, if one arrived.
    pub fn time_to_first_fix(&self) -> Option<f32> {
        self.first_fix.map(|at| at.as_secs_f32())
    }
}
