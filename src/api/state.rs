//! API shared state and node lookup

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::timeout;
use tracing::warn;

use super::error::{ApiError, ApiResult};
use crate::monitor::Monitor;
use crate::subscription::{SubscribeOptions, Subscriber};
use crate::tree::{ApplicationNode, Collection, InstanceNode, ServiceNode};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<Monitor>,

    /// How long a point-in-time read waits for a node's first status
    pub status_timeout: Duration,
}

impl ApiState {
    pub fn new(monitor: Arc<Monitor>, status_timeout: Duration) -> Self {
        Self {
            monitor,
            status_timeout,
        }
    }

    pub fn collection(&self) -> Target<'_> {
        Target::Collection(self.monitor.collection())
    }

    /// Resolve `app[/service[/instance]]`. Instance addresses may contain
    /// slashes themselves.
    pub fn resolve(&self, path: &str) -> ApiResult<Target<'_>> {
        let mut segments = path.trim_start_matches('/').splitn(3, '/');
        let collection = self.monitor.collection();

        let Some(app) = segments.next().filter(|s| !s.is_empty()) else {
            return Err(ApiError::InvalidRequest("missing application name".to_string()));
        };
        let application = collection
            .child(app)
            .ok_or_else(|| ApiError::NotFound(format!("unknown application '{app}'")))?;

        let Some(svc) = segments.next().filter(|s| !s.is_empty()) else {
            return Ok(Target::Application(application));
        };
        let service = application
            .child(svc)
            .ok_or_else(|| ApiError::NotFound(format!("unknown service '{app}/{svc}'")))?;

        let Some(address) = segments.next().filter(|s| !s.is_empty()) else {
            return Ok(Target::Service(service));
        };
        let instance = service
            .child(address)
            .ok_or_else(|| ApiError::NotFound(format!("unknown instance '{app}/{svc}/{address}'")))?;

        Ok(Target::Instance(instance))
    }
}

/// A node addressed by a request path
pub enum Target<'a> {
    Collection(&'a Collection),
    Application(&'a ApplicationNode),
    Service(&'a ServiceNode),
    Instance(&'a InstanceNode),
}

impl Target<'_> {
    /// Point-in-time status as JSON.
    pub async fn get_status(&self, depth: u8, wait: Duration) -> ApiResult<serde_json::Value> {
        match self {
            Target::Collection(node) => snapshot(*node, depth, wait).await,
            Target::Application(node) => snapshot(*node, depth, wait).await,
            Target::Service(node) => snapshot(*node, depth, wait).await,
            Target::Instance(node) => snapshot(*node, depth, wait).await,
        }
    }

    /// Live deliveries serialized as JSON text. Dropping the stream closes the
    /// subscription.
    pub async fn stream(&self, options: SubscribeOptions) -> ApiResult<BoxStream<'static, String>> {
        match self {
            Target::Collection(node) => json_stream(*node, options).await,
            Target::Application(node) => json_stream(*node, options).await,
            Target::Service(node) => json_stream(*node, options).await,
            Target::Instance(node) => json_stream(*node, options).await,
        }
    }
}

async fn snapshot<S: Subscriber>(node: &S, depth: u8, wait: Duration) -> ApiResult<serde_json::Value> {
    let status = timeout(wait, node.get_status(depth))
        .await
        .map_err(|_| ApiError::Unavailable("no status available yet".to_string()))??;

    serde_json::to_value(status).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn json_stream<S: Subscriber>(
    node: &S,
    options: SubscribeOptions,
) -> ApiResult<BoxStream<'static, String>> {
    let subscription = node.subscribe(options).await?;

    Ok(subscription
        .into_stream()
        .filter_map(|status| async move {
            serde_json::to_string(&status)
                .inspect_err(|e| warn!("failed to serialize status: {e}"))
                .ok()
        })
        .boxed())
}
