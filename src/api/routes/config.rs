use axum::{Json, extract::State};

use crate::api::state::ApiState;
use crate::config::Config;

/// GET /api/config
pub async fn get_config(State(state): State<ApiState>) -> Json<Config> {
    Json(state.monitor.config().clone())
}
