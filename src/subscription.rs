//! Subscription contract shared by every layer
//!
//! Every node of the tree is a [`Subscriber`]: observers call
//! [`Subscriber::subscribe`] with a set of [`SubscribeOptions`] and then pull
//! deliveries from the returned [`Subscription`] until they close it.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::actors::messages::{BrokerCommand, SubscriberId};
use crate::status::Node;

/// How a subscriber wants to see a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Complete subtree (true) or only the children that changed (false)
    pub full: bool,

    /// Child map levels to include; saturated to the layer's maximum
    pub depth: u8,

    /// Upper bound on the time between two deliveries
    pub max_stale: Option<Duration>,

    /// Skip deliveries that carry no up/down transition
    pub only_changes: bool,

    pub(crate) lossless: bool,
}

impl SubscribeOptions {
    /// A zero `max_stale` disables heartbeats.
    pub fn new(full: bool, depth: u8, max_stale: Duration, only_changes: bool) -> Self {
        Self {
            full,
            depth,
            max_stale: (!max_stale.is_zero()).then_some(max_stale),
            only_changes,
            lossless: false,
        }
    }

    /// Full view at `depth`, used for point-in-time reads.
    pub fn snapshot(depth: u8) -> Self {
        Self::new(true, depth, Duration::ZERO, false)
    }

    /// Every incremental update at full depth.
    pub fn deltas() -> Self {
        Self::new(false, u8::MAX, Duration::ZERO, false)
    }

    /// Every incremental update through an unbounded buffer that is never
    /// evicted. Used by fan-in aggregators and the metric exporter.
    pub(crate) fn lossless() -> Self {
        Self {
            lossless: true,
            ..Self::deltas()
        }
    }
}

/// Broker side of a subscriber's delivery buffer
#[derive(Debug)]
pub(crate) enum Outbox<N> {
    Bounded(mpsc::Sender<N>),
    Unbounded(mpsc::UnboundedSender<N>),
}

/// Why a delivery could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryError {
    /// The subscriber fell behind by a full buffer
    Lagging,

    /// The subscriber is gone
    Closed,
}

impl<N> Outbox<N> {
    pub(crate) fn channel(options: &SubscribeOptions, capacity: usize) -> (Self, Inbox<N>) {
        if options.lossless {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbox::Unbounded(tx), Inbox::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Outbox::Bounded(tx), Inbox::Bounded(rx))
        }
    }

    /// Queue a delivery without waiting.
    pub(crate) fn deliver(&self, status: N) -> Result<(), DeliveryError> {
        match self {
            Outbox::Bounded(tx) => tx.try_send(status).map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Lagging,
                TrySendError::Closed(_) => DeliveryError::Closed,
            }),
            Outbox::Unbounded(tx) => tx.send(status).map_err(|_| DeliveryError::Closed),
        }
    }

    /// Whether the subscriber closed or dropped its side.
    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Outbox::Bounded(tx) => tx.is_closed(),
            Outbox::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Subscriber side of a delivery buffer
#[derive(Debug)]
pub enum Inbox<N> {
    Bounded(mpsc::Receiver<N>),
    Unbounded(mpsc::UnboundedReceiver<N>),
}

impl<N> Inbox<N> {
    async fn recv(&mut self) -> Option<N> {
        match self {
            Inbox::Bounded(rx) => rx.recv().await,
            Inbox::Unbounded(rx) => rx.recv().await,
        }
    }

    fn close(&mut self) {
        match self {
            Inbox::Bounded(rx) => rx.close(),
            Inbox::Unbounded(rx) => rx.close(),
        }
    }
}

/// A live stream of status deliveries from one broker
///
/// Deliveries arrive in the order the broker dispatched them. Dropping the
/// subscription closes it.
#[derive(Debug)]
pub struct Subscription<N: Node> {
    id: SubscriberId,
    inbox: Inbox<N>,
    commands: mpsc::Sender<BrokerCommand<N>>,
    closed: bool,
}

impl<N: Node> Subscription<N> {
    pub(crate) fn new(
        id: SubscriberId,
        inbox: Inbox<N>,
        commands: mpsc::Sender<BrokerCommand<N>>,
    ) -> Self {
        Self {
            id,
            inbox,
            commands,
            closed: false,
        }
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the subscription is closed, or when the broker
    /// evicted it for falling behind.
    pub async fn next(&mut self) -> Option<N> {
        self.inbox.recv().await
    }

    /// Stop receiving deliveries. Calling this more than once is a no-op.
    ///
    /// A delivery already queued before the broker processes the departure
    /// may still be returned by [`Subscription::next`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbox.close();
        // a full mailbox drops this; the broker sweeps closed outboxes anyway
        let _ = self
            .commands
            .try_send(BrokerCommand::Unsubscribe { id: self.id });
    }

    pub fn into_stream(self) -> impl Stream<Item = N> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let status = subscription.next().await?;
            Some((status, subscription))
        })
    }
}

impl<N: Node> Drop for Subscription<N> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Something observers can subscribe to
#[async_trait]
pub trait Subscriber: Send + Sync {
    type Status: Node;

    async fn subscribe(&self, options: SubscribeOptions) -> anyhow::Result<Subscription<Self::Status>>;

    /// Point-in-time read: subscribe for the full view at `depth`, take one
    /// delivery and close.
    ///
    /// Waits for the node's first update if it has not received one yet.
    async fn get_status(&self, depth: u8) -> anyhow::Result<Self::Status> {
        let mut subscription = self.subscribe(SubscribeOptions::snapshot(depth)).await?;
        let status = subscription
            .next()
            .await
            .context("subscription closed before the first delivery")?;
        subscription.close();
        Ok(status)
    }
}
