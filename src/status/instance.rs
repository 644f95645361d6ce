use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ChangeClock, Node};
use crate::util::serialize_millis;

/// Status of a single probed endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstanceStatus {
    pub up: bool,

    #[serde(rename = "response_time_ms", serialize_with = "serialize_millis")]
    pub response_time: Duration,

    /// When the sample was taken
    pub timestamp: Option<DateTime<Utc>>,

    /// When `up` last flipped
    pub last_change: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub clock: ChangeClock,
}

impl Node for InstanceStatus {
    const MAX_DEPTH: u8 = 0;

    fn clock(&self) -> ChangeClock {
        self.clock
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn absorb(&mut self, delta: &Self) {
        self.merge_from(delta);
    }

    fn merge_from(&mut self, other: &Self) {
        let mut clock = self.clock;
        clock.advance(other.clock);
        *self = other.clone();
        self.clock = clock;
    }

    fn incremental(full: &Self, _delta: &Self) -> Self {
        full.clone()
    }

    fn prune(&mut self, _depth: u8) {}

    fn content_eq(&self, other: &Self) -> bool {
        self.up == other.up
            && self.response_time == other.response_time
            && self.timestamp == other.timestamp
    }

    fn retain_children(&mut self, _keep: &mut dyn FnMut(&str) -> bool) -> bool {
        true
    }
}
