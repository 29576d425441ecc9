//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::{EventStore, HistoryStore};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tracked_objects: usize,
}

/// GET /health - liveness plus the number of objects with a history.
pub async fn check<E, H>(State(state): State<Arc<AppState<E, H>>>) -> Json<HealthResponse>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    Json(HealthResponse {
        status: "ok",
        tracked_objects: state.dispatcher.tracked_objects().len(),
    })
}
