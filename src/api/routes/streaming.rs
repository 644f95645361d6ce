//! Server-Sent Events endpoints
//!
//! Every delivery of the subscription becomes one `data:` event. The
//! subscription lives exactly as long as the response stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State, rejection::QueryRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::debug;

use crate::api::{
    error::ApiResult,
    state::{ApiState, Target},
    types::StatusQuery,
};

type EventStream = Sse<BoxStream<'static, Result<Event, Infallible>>>;

async fn events(target: Target<'_>, query: StatusQuery) -> ApiResult<EventStream> {
    let options = query.subscribe_options()?;
    debug!(?options, "opening event stream");

    let stream = target
        .stream(options)
        .await?
        .map(|json| Ok(Event::default().data(json)))
        .boxed();

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /api/streaming/applications
pub async fn stream_collection(
    State(state): State<ApiState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<EventStream> {
    let Query(query) = query?;
    events(state.collection(), query).await
}

/// GET /api/streaming/application/{app}[/{service}[/{instance}]]
pub async fn stream_node(
    State(state): State<ApiState>,
    Path(path): Path<String>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<EventStream> {
    let Query(query) = query?;
    events(state.resolve(&path)?, query).await
}
