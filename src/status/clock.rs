//! Logical change clocks
//!
//! Every node carries an `idx` (updates seen) and a `cidx` (the `idx` of the
//! most recent update that was a genuine up/down transition somewhere in the
//! subtree). Instance clocks come from [`SampleTracker`]; every parent clock
//! comes from the [`ChangeTracker`] of its fan-in aggregator.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::InstanceStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeClock {
    pub idx: u64,
    pub cidx: u64,
}

impl ChangeClock {
    pub fn new(idx: u64, cidx: u64) -> Self {
        Self { idx, cidx }
    }

    /// Take the maximum of both counters.
    pub fn advance(&mut self, other: ChangeClock) {
        self.idx = self.idx.max(other.idx);
        self.cidx = self.cidx.max(other.cidx);
    }
}

/// One probe result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub up: bool,
    pub response_time: Duration,
    pub observed_at: DateTime<Utc>,
}

/// Turns raw samples of one instance into clocked instance statuses.
#[derive(Debug, Default)]
pub struct SampleTracker {
    clock: ChangeClock,
    last_up: Option<bool>,
    last_change: Option<DateTime<Utc>>,
}

impl SampleTracker {
    pub fn observe(&mut self, sample: Sample) -> InstanceStatus {
        self.clock.idx += 1;
        if self.last_up != Some(sample.up) {
            self.last_up = Some(sample.up);
            self.last_change = Some(sample.observed_at);
            self.clock.cidx = self.clock.idx;
        }

        InstanceStatus {
            up: sample.up,
            response_time: sample.response_time,
            timestamp: Some(sample.observed_at),
            last_change: self.last_change,
            clock: self.clock,
        }
    }
}

/// Parent-level clock bookkeeping of a fan-in aggregator.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    last_child_cidx: HashMap<String, u64>,
    clock: ChangeClock,
}

impl ChangeTracker {
    /// Record one child update and return the parent clock for the delta.
    pub fn observe(&mut self, child: &str, child_cidx: u64) -> ChangeClock {
        self.clock.idx += 1;
        let last = self.last_child_cidx.entry(child.to_string()).or_default();
        if child_cidx > *last {
            *last = child_cidx;
            self.clock.cidx = self.clock.idx;
        }
        self.clock
    }

    pub fn clock(&self) -> ChangeClock {
        self.clock
    }
}
