use std::collections::BTreeMap;

use serde::Serialize;

use super::{Aggregate, ApplicationStatus, Layer};

/// The root set of all applications
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollectionLayer;

pub type CollectionStatus = Aggregate<CollectionLayer>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub degraded: bool,
    pub failed: bool,
    pub applications_total: usize,
    pub applications_up: usize,
    pub applications_degraded: usize,
    pub applications_failed: usize,
    pub services_total: usize,
    pub services_up: usize,
    pub services_degraded: usize,
    pub services_failed: usize,
    pub instances_total: usize,
    pub instances_up: usize,
    pub instances_failed: usize,
}

impl Layer for CollectionLayer {
    const MAX_DEPTH: u8 = 3;

    type Child = ApplicationStatus;

    type Summary = CollectionSummary;

    fn recalculate(
        summary: &mut CollectionSummary,
        applications: &BTreeMap<String, ApplicationStatus>,
    ) {
        *summary = CollectionSummary::default();

        for application in applications.values() {
            let a = &application.summary;
            summary.applications_total += 1;
            if !a.failed && !a.degraded {
                summary.applications_up += 1;
            }
            if a.degraded {
                summary.applications_degraded += 1;
            }
            if a.failed {
                summary.applications_failed += 1;
            }
            summary.services_total += a.services_total;
            summary.services_up += a.services_up;
            summary.services_degraded += a.services_degraded;
            summary.services_failed += a.services_failed;
            summary.instances_total += a.instances_total;
            summary.instances_up += a.instances_up;
            summary.instances_failed += a.instances_failed;
        }

        summary.degraded = summary.applications_degraded > 0;
        summary.failed = summary.applications_failed > 0;
    }
}
