use std::collections::BTreeMap;

use serde::Serialize;

use super::{Aggregate, Layer, ServiceStatus};

/// An application: a named group of services
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApplicationLayer;

pub type ApplicationStatus = Aggregate<ApplicationLayer>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationSummary {
    pub degraded: bool,
    pub failed: bool,
    pub services_total: usize,
    pub services_up: usize,
    pub services_degraded: usize,
    pub services_failed: usize,
    pub instances_total: usize,
    pub instances_up: usize,
    pub instances_failed: usize,
}

impl Layer for ApplicationLayer {
    const MAX_DEPTH: u8 = 2;

    type Child = ServiceStatus;

    type Summary = ApplicationSummary;

    fn recalculate(summary: &mut ApplicationSummary, services: &BTreeMap<String, ServiceStatus>) {
        *summary = ApplicationSummary::default();

        for service in services.values() {
            let s = &service.summary;
            summary.services_total += 1;
            if !s.failed && !s.degraded {
                summary.services_up += 1;
            }
            if s.degraded {
                summary.services_degraded += 1;
            }
            if s.failed {
                summary.services_failed += 1;
            }
            summary.instances_total += s.instances_total;
            summary.instances_up += s.instances_up;
            summary.instances_failed += s.instances_failed;
        }

        summary.degraded = summary.services_degraded > 0;
        summary.failed = summary.services_failed > 0;
    }
}
