//! Request and response types of the HTTP API

use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use crate::subscription::SubscribeOptions;
use crate::util::parse_duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// View options accepted by every status endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    /// Child map levels to include; everything when absent or past the tree
    pub depth: Option<u32>,

    /// Full subtree on every delivery instead of the changed children only
    pub full: Option<bool>,

    /// Maximum time between two deliveries, e.g. `500ms`, `5s`, `1m`
    pub refresh: Option<String>,

    pub only_changes: Option<bool>,
}

impl StatusQuery {
    pub fn depth(&self) -> u8 {
        self.depth
            .map_or(u8::MAX, |depth| u8::try_from(depth).unwrap_or(u8::MAX))
    }

    /// Subscription options for streaming endpoints.
    pub fn subscribe_options(&self) -> ApiResult<SubscribeOptions> {
        let max_stale = match self.refresh.as_deref() {
            Some(refresh) => parse_duration(refresh)
                .map_err(|e| ApiError::InvalidRequest(format!("invalid refresh: {e:#}")))?,
            None => std::time::Duration::ZERO,
        };

        Ok(SubscribeOptions::new(
            self.full.unwrap_or(false),
            self.depth(),
            max_stale,
            self.only_changes.unwrap_or(false),
        ))
    }
}
