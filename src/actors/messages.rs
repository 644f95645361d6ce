//! Message types for actor communication
//!
//! Every actor owns one mpsc mailbox whose command enum is defined here.
//! Replies travel back over oneshot channels.

use tokio::sync::oneshot;

use crate::status::{Node, Sample};
use crate::subscription::{Inbox, SubscribeOptions};

/// Identifies one subscriber within a broker
pub type SubscriberId = u64;

/// Commands accepted by a status broker
///
/// All three inputs share one mailbox so the broker observes them in a single
/// total order.
#[derive(Debug)]
pub enum BrokerCommand<N: Node> {
    /// A raw update from the node's feeder
    Delta(N),

    /// Register a subscriber
    Subscribe {
        options: SubscribeOptions,
        respond_to: oneshot::Sender<(SubscriberId, Inbox<N>)>,
    },

    /// Remove a subscriber
    Unsubscribe { id: SubscriberId },
}

/// Commands that can be sent to a ProbeActor
#[derive(Debug)]
pub enum ProbeCommand {
    /// Run a check immediately, bypassing the interval timer
    CheckNow {
        respond_to: oneshot::Sender<anyhow::Result<Sample>>,
    },

    /// Stop probing
    Shutdown,
}

/// Commands that can be sent to the ExporterActor
#[derive(Debug)]
pub enum ExporterCommand {
    /// Send all buffered data points now
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    GetStats {
        respond_to: oneshot::Sender<ExporterStats>,
    },

    Shutdown,
}

/// Exporter statistics
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Data points waiting to be sent
    pub buffered: usize,

    /// Data points accepted by the time-series database
    pub sent: u64,

    /// Data points discarded because the buffer overflowed
    pub dropped: u64,

    /// Number of successful flushes
    pub flush_count: u64,
}
