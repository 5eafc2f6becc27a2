use crate::{inference::InferenceStatus, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub objects: Vec<String>,
    pub scenario: String,
    pub status: InferenceStatus,
    /// Milliseconds since the result was committed, `null` before the first one.
    pub age_ms: Option<u64>,
}

#[instrument(skip(state))]
pub async fn latest(State(state): State<SharedState>) -> Json<LatestResponse> {
    let entry = state.cache.read();

    Json(LatestResponse {
        objects: entry.result.objects.clone(),
        scenario: entry.result.scenario.clone(),
        status: entry.result.status.clone(),
        age_ms: entry.age().map(|age| age.as_millis() as u64),
    })
}
