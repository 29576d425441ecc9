//! Per-object signals and inspection endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::{
    Event, EventStore, HistoryStore, MessageGroup, ObjectId, ProcessingState, Version,
};
use sequencer::Disposition;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HistoryResponse {
    pub object_id: String,
    pub last_processed_version: Version,
    pub pending: Vec<PendingVersion>,
}

#[derive(Serialize)]
pub struct PendingVersion {
    pub version: Version,
    pub state: ProcessingState,
    pub group: MessageGroup,
}

/// Finds the stored event for one version of an object.
async fn stored_event<E, H>(
    state: &AppState<E, H>,
    object_id: &ObjectId,
    version: Version,
) -> Result<Option<Event>, ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let events = state
        .dispatcher
        .event_store()
        .get_events_for_object(object_id)
        .await?;
    Ok(events.into_iter().find(|e| e.version == version))
}

/// POST /objects/{object_id}/versions/{version}/ack - downstream acknowledgement.
#[tracing::instrument(skip(state))]
pub async fn ack<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Path((object_id, version)): Path<(String, i64)>,
) -> Result<Json<Disposition>, ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let object_id = ObjectId::new(object_id);
    let version = Version::new(version);

    let event = stored_event(&state, &object_id, version)
        .await?
        .unwrap_or_else(|| Event::fresh(object_id, version, MessageGroup::default(), ""));
    let disposition = state
        .dispatcher
        .handle(event.with_state(ProcessingState::AckReceived))
        .await;
    Ok(Json(disposition))
}

/// POST /objects/{object_id}/versions/{version}/processed - the consuming
/// application finished with this version.
#[tracing::instrument(skip(state))]
pub async fn processed<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Path((object_id, version)): Path<(String, i64)>,
) -> Result<Json<Disposition>, ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let object_id = ObjectId::new(object_id);
    let version = Version::new(version);

    let event = stored_event(&state, &object_id, version)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No event for object {object_id} version {version}"))
        })?;
    let disposition = state
        .dispatcher
        .handle(event.with_state(ProcessingState::AppProcessed))
        .await;
    Ok(Json(disposition))
}

/// POST /objects/{object_id}/versions/{version}/replay - drive a stuck
/// buffered version again.
#[tracing::instrument(skip(state))]
pub async fn replay<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Path((object_id, version)): Path<(String, i64)>,
) -> Json<Disposition>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let disposition = state
        .dispatcher
        .replay(&ObjectId::new(object_id), Version::new(version))
        .await;
    Json(disposition)
}

/// GET /objects/{object_id}/history - watermark and buffered versions.
pub async fn history<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Path(object_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let history = state
        .dispatcher
        .history(&ObjectId::new(object_id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("No history for object {object_id}")))?;

    Ok(Json(HistoryResponse {
        object_id: history.object_id.into(),
        last_processed_version: history.last_processed_version,
        pending: history
            .versions
            .into_values()
            .map(|e| PendingVersion {
                version: e.version,
                state: e.state,
                group: e.group,
            })
            .collect(),
    }))
}

/// GET /objects/{object_id}/events - every stored event of the object.
pub async fn events<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Path(object_id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let events = state
        .dispatcher
        .event_store()
        .get_events_for_object(&ObjectId::new(object_id))
        .await?;
    Ok(Json(events))
}
