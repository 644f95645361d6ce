//! Health check endpoint

use axum::Json;

use crate::api::types::HealthResponse;

/// GET /api/health
///
/// Liveness of the API itself, independent of the monitored tree
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
