use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::{Aggregate, InstanceStatus, Layer};
use crate::util::serialize_millis;

/// A service: a redundant group of instances
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServiceLayer;

pub type ServiceStatus = Aggregate<ServiceLayer>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceSummary {
    #[serde(rename = "average_response_time_ms", serialize_with = "serialize_millis")]
    pub average_response_time: Duration,
    pub degraded: bool,
    pub failed: bool,
    /// Number of down instances tolerated before the service counts as failed
    pub max_failures: usize,
    pub instances_total: usize,
    pub instances_up: usize,
    pub instances_failed: usize,
}

impl Layer for ServiceLayer {
    const MAX_DEPTH: u8 = 1;

    type Child = InstanceStatus;

    type Summary = ServiceSummary;

    fn recalculate(summary: &mut ServiceSummary, instances: &BTreeMap<String, InstanceStatus>) {
        let mut total_response = Duration::ZERO;
        summary.instances_total = instances.len();
        summary.instances_up = 0;
        summary.instances_failed = 0;

        for instance in instances.values() {
            if instance.up {
                summary.instances_up += 1;
            } else {
                summary.instances_failed += 1;
            }
            total_response += instance.response_time;
        }

        summary.average_response_time = match u32::try_from(summary.instances_total) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(total) => total_response / total,
        };
        summary.degraded = summary.instances_failed > 0;
        summary.failed = summary.instances_failed > summary.max_failures;
    }
}
