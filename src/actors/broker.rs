//! StatusBroker - owns one node's canonical status and its subscribers
//!
//! One broker task runs per node of the tree. It is the only code that ever
//! touches the node's status or subscriber registry, so neither needs a lock.
//!
//! ## Message Flow
//!
//! ```text
//! Delta ──► absorb into full view ──► derive incremental view ──► per subscriber:
//!                                                                   view cache lookup
//!                                                                   changed / stale / only_changes?
//!                                                                   try_send into its buffer
//!     ↑
//!     └─── Subscribe / Unsubscribe, heartbeat timer
//! ```
//!
//! ## View Cache
//!
//! A subscriber's options collapse to a [`View`] (`full`, clamped `depth`).
//! The broker keeps one cached record per view plus a freshness bit that is
//! cleared on every delta. Views are derived lazily, only when a connected
//! subscriber asks for them.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, instrument, trace, warn};

use super::messages::{BrokerCommand, SubscriberId};
use crate::status::{Node, View};
use crate::subscription::{DeliveryError, Inbox, Outbox, SubscribeOptions, Subscriber, Subscription};

/// Default per-subscriber buffer size
pub const DEFAULT_DELIVERY_BUFFER: usize = 64;

/// Mailbox size of a broker
const COMMAND_BUFFER: usize = 64;

/// Broker tuning
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Deliveries a subscriber may fall behind by before it is evicted
    pub delivery_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
        }
    }
}

/// Lazily computed views of the current status
struct ViewCache<N> {
    slots: Vec<Option<N>>,
    fresh: Vec<bool>,
}

impl<N: Node> ViewCache<N> {
    fn new() -> Self {
        let variations = View::variations::<N>();
        Self {
            slots: vec![None; variations],
            fresh: vec![false; variations],
        }
    }

    fn invalidate(&mut self) {
        self.fresh.fill(false);
    }

    fn get(&mut self, view: View, full: &N, incremental: &N) -> &N {
        let slot = view.slot();
        if !self.fresh[slot] {
            self.slots[slot] = None;
            self.fresh[slot] = true;
        }
        self.slots[slot].get_or_insert_with(|| {
            let mut status = if view.full {
                full.clone()
            } else {
                incremental.clone()
            };
            status.prune(view.depth);
            status
        })
    }
}

/// Bookkeeping for one connected subscriber
struct SubscriberState<N> {
    view: View,
    max_stale: Option<Duration>,
    only_changes: bool,
    outbox: Outbox<N>,
    last_delivery: Instant,
    last_idx: u64,
    last_sent: Option<N>,
}

impl<N: Node> SubscriberState<N> {
    fn is_stale(&self, now: Instant) -> bool {
        self.max_stale
            .is_some_and(|max_stale| now.duration_since(self.last_delivery) >= max_stale)
    }

    fn wants(&self, status: &N, now: Instant) -> bool {
        if self.is_stale(now) {
            return true;
        }
        if self.only_changes {
            return status.clock().cidx > self.last_idx;
        }
        self.last_sent
            .as_ref()
            .is_none_or(|previous| !previous.content_eq(status))
    }

    fn deliver(&mut self, status: &N, now: Instant) -> Result<(), DeliveryError> {
        self.outbox.deliver(status.clone())?;
        self.last_delivery = now;
        self.last_idx = status.clock().idx;
        self.last_sent = Some(status.clone());
        Ok(())
    }

    fn heartbeat_due(&self) -> Option<Instant> {
        self.max_stale
            .map(|max_stale| self.last_delivery + max_stale)
    }
}

/// Actor owning one node's status
pub struct StatusBroker<N: Node> {
    name: String,

    command_rx: mpsc::Receiver<BrokerCommand<N>>,

    /// Configured child names; deltas naming anything else are discarded
    members: Option<BTreeSet<String>>,

    config: BrokerConfig,

    /// Canonical full status at maximum depth
    full: N,

    /// Canonical incremental status for the latest delta
    incremental: N,

    /// Number of deltas merged so far
    processed: u64,

    views: ViewCache<N>,

    subscribers: HashMap<SubscriberId, SubscriberState<N>>,

    next_id: SubscriberId,
}

impl<N: Node> StatusBroker<N> {
    pub fn new(
        name: String,
        seed: N,
        members: Option<BTreeSet<String>>,
        config: BrokerConfig,
        command_rx: mpsc::Receiver<BrokerCommand<N>>,
    ) -> Self {
        Self {
            name,
            command_rx,
            members,
            config,
            incremental: seed.clone(),
            full: seed,
            processed: 0,
            views: ViewCache::new(),
            subscribers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Run the broker until every handle and subscription is dropped.
    #[instrument(skip(self), fields(node = %self.name))]
    pub async fn run(mut self) {
        debug!("starting status broker");

        loop {
            let heartbeat = self.next_heartbeat();

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(BrokerCommand::Delta(delta)) => self.process_delta(delta),

                    Some(BrokerCommand::Subscribe { options, respond_to }) => {
                        self.register(options, respond_to);
                    }

                    Some(BrokerCommand::Unsubscribe { id }) => {
                        if self.subscribers.remove(&id).is_some() {
                            trace!(subscriber = id, "subscriber left");
                        }
                    }

                    None => {
                        debug!("all handles dropped, shutting down");
                        break;
                    }
                },

                _ = sleep_until(heartbeat.unwrap_or_else(Instant::now)), if heartbeat.is_some() => {
                    self.send_heartbeats();
                }
            }
        }

        debug!("status broker stopped");
    }

    fn process_delta(&mut self, mut delta: N) {
        if let Some(members) = &self.members {
            let name = &self.name;
            let relevant = delta.retain_children(&mut |child| {
                let known = members.contains(child);
                if !known {
                    warn!(node = %name, child, "discarding update for unknown child");
                }
                known
            });
            if !relevant {
                return;
            }
        }

        self.full.absorb(&delta);
        self.incremental = N::incremental(&self.full, &delta);
        self.processed += 1;
        self.views.invalidate();
        self.sweep_closed();

        let clock = self.full.clock();
        trace!(idx = clock.idx, cidx = clock.cidx, "merged delta");

        let now = Instant::now();
        let mut departed = Vec::new();

        for (id, subscriber) in self.subscribers.iter_mut() {
            let status = self.views.get(subscriber.view, &self.full, &self.incremental);
            if !subscriber.wants(status, now) {
                continue;
            }
            if let Err(e) = subscriber.deliver(status, now) {
                departed.push((*id, e));
            }
        }

        self.remove_departed(departed);
    }

    fn register(
        &mut self,
        options: SubscribeOptions,
        respond_to: oneshot::Sender<(SubscriberId, Inbox<N>)>,
    ) {
        let id = self.next_id;
        self.next_id += 1;

        let (outbox, inbox) = Outbox::channel(&options, self.config.delivery_buffer);
        let now = Instant::now();
        let mut subscriber = SubscriberState {
            view: View::clamped::<N>(options.full, options.depth),
            max_stale: options.max_stale,
            only_changes: options.only_changes,
            outbox,
            last_delivery: now,
            last_idx: 0,
            last_sent: None,
        };

        // new observers start from the complete picture at their depth
        if self.processed > 0 {
            let snapshot = self.views.get(
                View::clamped::<N>(true, options.depth),
                &self.full,
                &self.incremental,
            );
            if let Err(e) = subscriber.deliver(snapshot, now) {
                debug!(subscriber = id, ?e, "initial snapshot not delivered");
            }
        }

        if respond_to.send((id, inbox)).is_err() {
            debug!(subscriber = id, "subscriber gave up before registration completed");
            return;
        }

        trace!(subscriber = id, ?options, "subscriber registered");
        self.subscribers.insert(id, subscriber);
    }

    fn next_heartbeat(&self) -> Option<Instant> {
        self.subscribers
            .values()
            .filter_map(SubscriberState::heartbeat_due)
            .min()
    }

    fn send_heartbeats(&mut self) {
        self.sweep_closed();
        let now = Instant::now();
        let mut departed = Vec::new();

        for (id, subscriber) in self.subscribers.iter_mut() {
            if !subscriber.is_stale(now) {
                continue;
            }
            if self.processed == 0 {
                // nothing to send yet, push the deadline out
                subscriber.last_delivery = now;
                continue;
            }
            let status = self.views.get(subscriber.view, &self.full, &self.incremental);
            if let Err(e) = subscriber.deliver(status, now) {
                departed.push((*id, e));
            }
        }

        self.remove_departed(departed);
    }

    /// Drop subscribers whose inbox is gone, whether or not their
    /// Unsubscribe made it through the mailbox.
    fn sweep_closed(&mut self) {
        self.subscribers.retain(|id, subscriber| {
            let closed = subscriber.outbox.is_closed();
            if closed {
                trace!(subscriber = *id, "subscriber went away");
            }
            !closed
        });
    }

    fn remove_departed(&mut self, departed: Vec<(SubscriberId, DeliveryError)>) {
        for (id, reason) in departed {
            self.subscribers.remove(&id);
            match reason {
                DeliveryError::Lagging => {
                    warn!(subscriber = id, "evicting subscriber that fell behind");
                }
                DeliveryError::Closed => trace!(subscriber = id, "subscriber went away"),
            }
        }
    }
}

/// Handle for feeding and subscribing to a StatusBroker
pub struct BrokerHandle<N: Node> {
    sender: mpsc::Sender<BrokerCommand<N>>,
    name: String,
}

impl<N: Node> Clone for BrokerHandle<N> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            name: self.name.clone(),
        }
    }
}

impl<N: Node> BrokerHandle<N> {
    /// Spawn a broker seeded with `seed`.
    ///
    /// When `members` is given, deltas naming any other child are discarded.
    pub fn spawn(
        name: impl Into<String>,
        seed: N,
        members: Option<BTreeSet<String>>,
        config: BrokerConfig,
    ) -> Self {
        let name = name.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        let broker = StatusBroker::new(name.clone(), seed, members, config, cmd_rx);

        tokio::spawn(broker.run());

        Self {
            sender: cmd_tx,
            name,
        }
    }

    /// Hand a raw update to the broker.
    pub async fn publish(&self, delta: N) -> Result<()> {
        self.sender
            .send(BrokerCommand::Delta(delta))
            .await
            .context("failed to send Delta command")?;
        Ok(())
    }

    /// Register a subscriber. If the broker has processed any update, the
    /// initial snapshot is already queued when this returns.
    pub async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription<N>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Subscribe {
                options,
                respond_to: tx,
            })
            .await
            .context("failed to send Subscribe command")?;

        let (id, inbox) = rx.await.context("failed to receive subscription")?;
        Ok(Subscription::new(id, inbox, self.sender.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<N: Node> Subscriber for BrokerHandle<N> {
    type Status = N;

    async fn subscribe(&self, options: SubscribeOptions) -> Result<Subscription<N>> {
        BrokerHandle::subscribe(self, options).await
    }
}
