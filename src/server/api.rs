use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::{AppState, KeyQuery};
use crate::error::OtaError;
use crate::pull::{PullOutcome, PullRequest, RollbackBody};
use crate::sync::{TransportKind, Visit};
use crate::synth::{AuthoredUpdate, Trigger};
use crate::version::Version;

pub async fn health() -> impl IntoResponse {
    Json("OK")
}

/// `GET /api/ota`
pub async fn pull(
    State(state): State<AppState>,
    Query(request): Query<PullRequest>,
) -> Result<Response, OtaError> {
    let response = match state.pull.handle(&request)? {
        PullOutcome::Update(record) => Json(&*record).into_response(),
        PullOutcome::Rollback(record) => Json(RollbackBody::new(&record)).into_response(),
        PullOutcome::NoContent => StatusCode::NO_CONTENT.into_response(),
    };
    Ok(response)
}

/// `POST /api/ota`: register an authored record and push it to every client.
pub async fn create_update(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
    body: Bytes,
) -> Result<Response, OtaError> {
    state.auth.check(query.api_key.as_deref())?;
    let authored: AuthoredUpdate = serde_json::from_slice(&body)?;

    let record = state.synthesizer.synthesize(Trigger::Authored(authored)).await?;
    tracing::info!(version = %record.version, "registered manual update");
    state.broadcaster.publish(&record).await;

    Ok((StatusCode::CREATED, Json(&*record)).into_response())
}

#[derive(Debug, Default, Serialize)]
pub struct ClientCounts {
    pub total: usize,
    pub sse: usize,
    pub websocket: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub latest_version: Option<Version>,
    pub versions: Vec<Version>,
    pub clients: ClientCounts,
}

/// `GET /api/ota/status`
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<StatusBody>, OtaError> {
    state.auth.check(query.api_key.as_deref())?;

    let mut clients = ClientCounts::default();
    state.registry.for_each(|sub| {
        clients.total += 1;
        match sub.transport {
            TransportKind::Sse => clients.sse += 1,
            TransportKind::WebSocket => clients.websocket += 1,
        }
        Visit::Keep
    });

    Ok(Json(StatusBody {
        latest_version: state.store.latest_version(),
        versions: state.store.versions(),
        clients,
    }))
}
