use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::events::EventLogger;
use crate::models::{now_ts, AttributionState, CompanyInference};
use crate::pipeline::{Job, Pipeline};
use crate::redirect::handlers::engagement_response;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub events: EventLogger,
    pub pipeline: Pipeline,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub(crate) fn internal_error(context: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "{context}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

#[derive(Deserialize)]
pub struct EnrichRequest {
    #[serde(rename = "eventID")]
    pub event_id: i64,
}

#[derive(Serialize)]
pub struct EnrichAccepted {
    #[serde(rename = "eventID")]
    pub event_id: i64,
    pub queued: bool,
}

/// Queue enrichment of a stored event. An event that already has an
/// inference is left alone by the worker.
pub async fn enrich_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnrichRequest>,
) -> Result<(StatusCode, Json<EnrichAccepted>), ApiError> {
    match state.storage.get_event(payload.event_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "Event not found")),
        Err(e) => return Err(internal_error("Failed to load event", e)),
    }

    let queued = state.pipeline.submit(Job::Enrich {
        event_id: payload.event_id,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(EnrichAccepted {
            event_id: payload.event_id,
            queued,
        }),
    ))
}

pub async fn confirm_engagement(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    engagement_response(&state.events, &body).await
}

#[derive(Deserialize)]
pub struct AttributionUpdate {
    pub state: AttributionState,
}

/// Move an inference through the review states
pub async fn update_attribution(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
    Json(payload): Json<AttributionUpdate>,
) -> Result<Json<CompanyInference>, ApiError> {
    let current = match state.storage.get_inference(event_id).await {
        Ok(Some(inference)) => inference,
        Ok(None) => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                "No company inference for this event",
            ))
        }
        Err(e) => return Err(internal_error("Failed to load inference", e)),
    };

    let from = current.attribution_state;
    let to = from
        .transition(payload.state)
        .map_err(|e| api_error(StatusCode::CONFLICT, e.to_string()))?;

    let applied = state
        .storage
        .transition_attribution(event_id, from, to, now_ts())
        .await
        .map_err(|e| internal_error("Failed to update attribution", e))?;
    if !applied {
        return Err(api_error(
            StatusCode::CONFLICT,
            "Attribution state changed concurrently, retry",
        ));
    }

    tracing::info!(event_id, from = %from, to = %to, "Attribution state updated");

    match state.storage.get_inference(event_id).await {
        Ok(Some(updated)) => Ok(Json(updated)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, "Inference disappeared")),
        Err(e) => Err(internal_error("Failed to reload inference", e)),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}
