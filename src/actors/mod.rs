//! Actor-based status tree
//!
//! Every node of the monitoring tree is a broker actor. Each actor runs as an
//! independent async task and is reached only through its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ProbeActor (one per instance)
//!        │ Sample
//!        ▼
//!   StatusBroker<InstanceStatus> ──► FanInActor<ServiceLayer> ──► StatusBroker<ServiceStatus>
//!                                                                        │
//!                                    FanInActor<ApplicationLayer> ◄──────┘
//!                                                 │
//!                                                 ▼
//!                                    StatusBroker<ApplicationStatus> ──► FanInActor<CollectionLayer>
//!                                                                                 │
//!                                                                                 ▼
//!                       API subscribers, ExporterActor ◄──────────── StatusBroker<CollectionStatus>
//! ```
//!
//! ## Actor Types
//!
//! - **StatusBroker**: owns one node's status, merges deltas, serves subscribers
//! - **FanInActor**: subscribes to a node's children and feeds the node's broker
//! - **ProbeActor**: checks one instance address on a timer
//! - **ExporterActor**: ships collection updates to OpenTSDB
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Subscriptions**: Brokers push deliveries into a per-subscriber buffer
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod aggregator;
pub mod broker;
pub mod exporter;
pub mod messages;
pub mod probe;
