//! FanInActor - bridges one layer of the tree into its parent broker
//!
//! A parent node subscribes to every child with a lossless incremental
//! subscription and forwards each delivery as a single-child delta.
//!
//! ## Message Flow
//!
//! ```text
//! child-1 ─┐
//! child-2 ─┼─► select_all ─► ChangeTracker (idx, cidx) ─► Aggregate::delta ─► parent broker
//! child-N ─┘
//! ```
//!
//! The tracker bumps the parent `idx` for every child update and moves the
//! parent `cidx` only when the child reports a newer `cidx` than it did
//! before, so "something really changed" travels up without re-deriving it.

use anyhow::Result;
use futures::StreamExt;
use futures::stream::{BoxStream, SelectAll};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};

use super::broker::BrokerHandle;
use crate::status::{Aggregate, ChangeTracker, Layer, Node};
use crate::subscription::{SubscribeOptions, Subscriber};

type ChildUpdates<N> = SelectAll<BoxStream<'static, (String, N)>>;

/// Actor feeding one parent broker from its children
pub struct FanInActor<L: Layer> {
    name: String,

    updates: ChildUpdates<L::Child>,

    tracker: ChangeTracker,

    parent: BrokerHandle<Aggregate<L>>,
}

impl<L: Layer> FanInActor<L> {
    /// Subscribe to every child and start forwarding into `parent`.
    ///
    /// The returned task runs until every child subscription ends or the
    /// parent broker is gone.
    pub async fn spawn<'a, C>(
        parent: BrokerHandle<Aggregate<L>>,
        children: impl IntoIterator<Item = (&'a String, &'a C)>,
    ) -> Result<JoinHandle<()>>
    where
        C: Subscriber<Status = L::Child> + 'a,
    {
        let mut updates = SelectAll::new();
        for (name, child) in children {
            let subscription = child.subscribe(SubscribeOptions::lossless()).await?;
            let name = name.clone();
            updates.push(
                subscription
                    .into_stream()
                    .map(move |status| (name.clone(), status))
                    .boxed(),
            );
        }

        let actor = Self {
            name: parent.name().to_string(),
            updates,
            tracker: ChangeTracker::default(),
            parent,
        };

        Ok(tokio::spawn(actor.run()))
    }

    #[instrument(skip(self), fields(node = %self.name))]
    async fn run(mut self) {
        debug!(children = self.updates.len(), "starting fan-in");

        while let Some((child, status)) = self.updates.next().await {
            let clock = self.tracker.observe(&child, status.clock().cidx);
            trace!(%child, idx = clock.idx, cidx = clock.cidx, "forwarding child update");

            if self
                .parent
                .publish(Aggregate::delta(child, status, clock))
                .await
                .is_err()
            {
                debug!("parent broker gone");
                break;
            }
        }

        debug!("fan-in stopped");
    }
}
