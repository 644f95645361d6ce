//! Hierarchical health monitoring
//!
//! Instances are probed on a timer and their results flow up through services
//! and applications to one collection root. Every node is a broker that any
//! number of observers can subscribe to with their own view options.

pub mod actors;
pub mod api;
pub mod config;
pub mod monitor;
pub mod status;
pub mod subscription;
pub mod tree;
pub mod util;

pub use monitor::Monitor;
pub use status::{
    ApplicationStatus, ChangeClock, CollectionStatus, InstanceStatus, Node, Sample, ServiceStatus,
    View,
};
pub use subscription::{SubscribeOptions, Subscriber, Subscription};
