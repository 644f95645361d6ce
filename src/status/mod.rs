//! Status records for every layer of the monitoring tree
//!
//! The tree has four layers that share one shape:
//!
//! ```text
//! Collection ──► Application ──► Service ──► Instance
//!  (depth 3)      (depth 2)      (depth 1)   (depth 0)
//! ```
//!
//! Instances are leaves and carry the probe result directly. Every other layer
//! is an [`Aggregate`] parameterized by a [`Layer`], which supplies the child
//! type, the summary counters and the function that recomputes those counters
//! from the children.
//!
//! All records implement [`Node`], which is what the broker, the fan-in
//! aggregator and the subscription plumbing are generic over.

pub mod application;
pub mod clock;
pub mod collection;
pub mod instance;
pub mod service;

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use application::{ApplicationLayer, ApplicationStatus, ApplicationSummary};
pub use clock::{ChangeClock, ChangeTracker, Sample, SampleTracker};
pub use collection::{CollectionLayer, CollectionStatus, CollectionSummary};
pub use instance::InstanceStatus;
pub use service::{ServiceLayer, ServiceStatus, ServiceSummary};

/// A status record owned by exactly one broker.
pub trait Node: Clone + Debug + Default + PartialEq + Serialize + Send + Sync + 'static {
    /// Number of child map levels below this node.
    const MAX_DEPTH: u8;

    fn clock(&self) -> ChangeClock;

    fn timestamp(&self) -> Option<DateTime<Utc>>;

    fn last_change(&self) -> Option<DateTime<Utc>>;

    /// Merge a delta produced for this node into the canonical record and
    /// recompute the summary from the complete set of children.
    fn absorb(&mut self, delta: &Self);

    /// Merge a record published by this node's own broker into a copy held by
    /// a parent. The summary of `other` is authoritative and taken as-is.
    fn merge_from(&mut self, other: &Self);

    /// Summary of `full`, children restricted to those named in `delta`.
    fn incremental(full: &Self, delta: &Self) -> Self;

    /// Replace the child map `depth` levels down with an empty map.
    fn prune(&mut self, depth: u8);

    /// Equality on everything a subscriber can observe, ignoring this node's
    /// own clock and timestamps.
    fn content_eq(&self, other: &Self) -> bool;

    /// Drop direct children for which `keep` returns false. Returns whether
    /// the record still carries anything worth merging.
    fn retain_children(&mut self, keep: &mut dyn FnMut(&str) -> bool) -> bool;
}

/// Key of one cached view of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct View {
    pub full: bool,
    pub depth: u8,
}

impl View {
    /// Build a view, saturating `depth` to the node's maximum depth.
    pub fn clamped<N: Node>(full: bool, depth: u8) -> Self {
        Self {
            full,
            depth: depth.min(N::MAX_DEPTH),
        }
    }

    /// Number of distinct views for a node type.
    pub fn variations<N: Node>() -> usize {
        2 * (N::MAX_DEPTH as usize + 1)
    }

    pub fn slot(self) -> usize {
        self.depth as usize * 2 + usize::from(self.full)
    }
}

/// Per-layer parameters of an [`Aggregate`].
pub trait Layer:
    Clone + Copy + Debug + Default + PartialEq + Send + Sync + 'static
{
    const MAX_DEPTH: u8;

    type Child: Node;

    type Summary: Clone + Debug + Default + PartialEq + Serialize + Send + Sync + 'static;

    /// Recompute the summary counters by scanning every child. Settings held
    /// in the summary (thresholds) are preserved.
    fn recalculate(summary: &mut Self::Summary, children: &BTreeMap<String, Self::Child>);
}

/// Status of a node with children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(bound = "")]
pub struct Aggregate<L: Layer> {
    pub children: BTreeMap<String, L::Child>,

    #[serde(flatten)]
    pub summary: L::Summary,

    /// Latest contributing sample time
    pub timestamp: Option<DateTime<Utc>>,

    /// Latest time any descendant flipped between up and down
    pub last_change: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub clock: ChangeClock,

    #[serde(skip)]
    layer: L,
}

impl<L: Layer> Aggregate<L> {
    /// Empty record carrying the given summary settings.
    pub fn seeded(summary: L::Summary) -> Self {
        Self {
            summary,
            ..Default::default()
        }
    }

    /// Delta carrying a single child, as packaged by the fan-in aggregator.
    pub fn delta(name: impl Into<String>, child: L::Child, clock: ChangeClock) -> Self {
        Self {
            timestamp: child.timestamp(),
            last_change: child.last_change(),
            children: BTreeMap::from([(name.into(), child)]),
            clock,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&L::Child> {
        self.children.get(name)
    }

    fn recalculate(&mut self) {
        L::recalculate(&mut self.summary, &self.children);
        for child in self.children.values() {
            self.timestamp = self.timestamp.max(child.timestamp());
            self.last_change = self.last_change.max(child.last_change());
        }
    }
}

impl<L: Layer> Node for Aggregate<L> {
    const MAX_DEPTH: u8 = L::MAX_DEPTH;

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
        for (name, child) in &delta.children {
            self.children
                .entry(name.clone())
                .or_default()
                .merge_from(child);
        }
        self.recalculate();
        self.clock.advance(delta.clock);
    }

    fn merge_from(&mut self, other: &Self) {
        for (name, child) in &other.children {
            self.children
                .entry(name.clone())
                .or_default()
                .merge_from(child);
        }
        self.summary = other.summary.clone();
        self.timestamp = self.timestamp.max(other.timestamp);
        self.last_change = self.last_change.max(other.last_change);
        self.clock.advance(other.clock);
    }

    fn incremental(full: &Self, delta: &Self) -> Self {
        Self {
            children: delta.children.clone(),
            summary: full.summary.clone(),
            timestamp: full.timestamp,
            last_change: full.last_change,
            clock: full.clock,
            layer: L::default(),
        }
    }

    fn prune(&mut self, depth: u8) {
        if depth == 0 {
            self.children.clear();
            return;
        }
        for child in self.children.values_mut() {
            child.prune(depth - 1);
        }
    }

    fn content_eq(&self, other: &Self) -> bool {
        self.summary == other.summary
            && self.children.len() == other.children.len()
            && self.children.iter().all(|(name, child)| {
                other
                    .children
                    .get(name)
                    .is_some_and(|theirs| child.content_eq(theirs))
            })
    }

    fn retain_children(&mut self, keep: &mut dyn FnMut(&str) -> bool) -> bool {
        self.children.retain(|name, _| keep(name));
        !self.children.is_empty()
    }
}
