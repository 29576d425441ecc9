//! Event ingress endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use event_store::{Event, EventStore, HistoryStore, MessageGroup, ObjectId, Version};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IngestRequest {
    pub object_id: String,
    pub version: i64,
    pub group: Option<MessageGroup>,
    pub payload: Option<String>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub object_id: String,
    pub version: i64,
    pub group: MessageGroup,
    pub status: &'static str,
}

/// POST /events - accept a new event version and hand it to the pipeline.
///
/// Fire-and-forget: the response only confirms the event was accepted.
#[tracing::instrument(skip(state, req), fields(object_id = %req.object_id, version = req.version))]
pub async fn ingest<E, H>(
    State(state): State<Arc<AppState<E, H>>>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError>
where
    E: EventStore + 'static,
    H: HistoryStore + 'static,
{
    let object_id = ObjectId::new(req.object_id.trim());
    if object_id.is_blank() {
        metrics::counter!("ingress_events_total", "outcome" => "rejected").increment(1);
        return Err(ApiError::BadRequest("object_id must not be empty".to_string()));
    }
    if req.version < Version::first().as_i64() {
        metrics::counter!("ingress_events_total", "outcome" => "rejected").increment(1);
        return Err(ApiError::BadRequest(format!(
            "version must be at least {}, got {}",
            Version::first(),
            req.version
        )));
    }

    let group = req.group.unwrap_or_default();
    let payload = req.payload.unwrap_or_else(|| {
        format!(
            "<event objectId=\"{}\" version=\"{}\"/>",
            object_id, req.version
        )
    });
    let event = Event::fresh(object_id.clone(), Version::new(req.version), group, payload);

    let _ = state.dispatcher.send(event);
    metrics::counter!("ingress_events_total", "outcome" => "accepted").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            object_id: object_id.into(),
            version: req.version,
            group,
            status: "accepted",
        }),
    ))
}
