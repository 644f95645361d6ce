//! Point-in-time status endpoints

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::Redirect,
};

use crate::api::{error::ApiResult, state::ApiState, types::StatusQuery};

/// GET /api/applications
pub async fn applications_redirect() -> Redirect {
    Redirect::permanent("/api/status/applications")
}

/// GET /api/status/applications?depth=
pub async fn get_collection(
    State(state): State<ApiState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query?;
    let status = state
        .collection()
        .get_status(query.depth(), state.status_timeout)
        .await?;
    Ok(Json(status))
}

/// GET /api/status/application/{app}[/{service}[/{instance}]]?depth=
pub async fn get_node(
    State(state): State<ApiState>,
    Path(path): Path<String>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query?;
    let status = state
        .resolve(&path)?
        .get_status(query.depth(), state.status_timeout)
        .await?;
    Ok(Json(status))
}
