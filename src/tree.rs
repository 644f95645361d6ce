//! The broker tree
//!
//! ```text
//! Collection ◄── fan-in ── ApplicationNode ◄── fan-in ── ServiceNode ◄── fan-in ── InstanceNode ◄── probe
//! ```
//!
//! Every node owns one broker. A [`Branch`] additionally owns the fan-in task
//! that feeds its broker from its children. All nodes implement
//! [`Subscriber`], so observers attach to any level the same way.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::actors::aggregator::FanInActor;
use crate::actors::broker::{BrokerConfig, BrokerHandle};
use crate::status::{
    Aggregate, ApplicationLayer, CollectionLayer, InstanceStatus, Layer, Sample, SampleTracker,
    ServiceLayer,
};
use crate::subscription::{SubscribeOptions, Subscriber, Subscription};

/// Leaf of the tree
pub struct InstanceNode {
    address: String,
    broker: BrokerHandle<InstanceStatus>,
}

impl InstanceNode {
    pub fn new(address: impl Into<String>, config: BrokerConfig) -> Self {
        let address = address.into();
        let broker = BrokerHandle::spawn(address.clone(), InstanceStatus::default(), None, config);
        Self { address, broker }
    }

    /// Input for the instance's probe.
    pub fn feed(&self) -> InstanceFeed {
        InstanceFeed {
            broker: self.broker.clone(),
            tracker: SampleTracker::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Subscriber for InstanceNode {
    type Status = InstanceStatus;

    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription<InstanceStatus>> {
        self.broker.subscribe(options).await
    }
}

/// Turns probe samples into clocked updates of one instance broker
pub struct InstanceFeed {
    broker: BrokerHandle<InstanceStatus>,
    tracker: SampleTracker,
}

impl InstanceFeed {
    pub async fn push(&mut self, sample: Sample) -> Result<InstanceStatus> {
        let status = self.tracker.observe(sample);
        self.broker
            .publish(status.clone())
            .await
            .with_context(|| format!("instance {} is gone", self.broker.name()))?;
        Ok(status)
    }
}

/// Inner node of the tree: a broker fed by the children it owns
pub struct Branch<L: Layer, C> {
    name: String,
    broker: BrokerHandle<Aggregate<L>>,
    children: BTreeMap<String, C>,
    fan_in: JoinHandle<()>,
}

pub type ServiceNode = Branch<ServiceLayer, InstanceNode>;
pub type ApplicationNode = Branch<ApplicationLayer, ServiceNode>;
pub type Collection = Branch<CollectionLayer, ApplicationNode>;

impl<L, C> Branch<L, C>
where
    L: Layer,
    C: Subscriber<Status = L::Child>,
{
    /// Spawn the node's broker seeded with `summary` and start fanning in
    /// from `children`. Updates naming anything but these children are
    /// discarded.
    pub async fn assemble(
        name: impl Into<String>,
        summary: L::Summary,
        children: BTreeMap<String, C>,
        config: BrokerConfig,
    ) -> Result<Self> {
        let name = name.into();
        let broker = BrokerHandle::spawn(
            name.clone(),
            Aggregate::seeded(summary),
            Some(children.keys().cloned().collect()),
            config,
        );
        let fan_in = FanInActor::spawn(broker.clone(), &children)
            .await
            .with_context(|| format!("failed to subscribe to the children of {name}"))?;

        Ok(Self {
            name,
            broker,
            children,
            fan_in,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn child(&self, name: &str) -> Option<&C> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &C)> {
        self.children.iter()
    }
}

#[async_trait]
impl<L, C> Subscriber for Branch<L, C>
where
    L: Layer,
    C: Subscriber<Status = L::Child>,
{
    type Status = Aggregate<L>;

    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription<Aggregate<L>>> {
        self.broker.subscribe(options).await
    }
}

impl<L: Layer, C> Drop for Branch<L, C> {
    fn drop(&mut self) {
        self.fan_in.abort();
    }
}
