use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    /// Results written to the cache since startup.
    results_committed: u64,
    last_result_age_ms: Option<u64>,
}

/// Always available while the process runs. "Warming up" until the first
/// inference result lands in the cache.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<Health> {
    let results_committed = state.cache.version();
    let last_result_age_ms = state
        .cache
        .read()
        .age()
        .map(|age| age.as_millis() as u64);

    Json(Health {
        status: if results_committed == 0 {
            "WarmingUp"
        } else {
            "Available"
        },
        results_committed,
        last_result_age_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::ResultCache, inference::InferenceResult, telemetry::Metrics};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> SharedState {
        SharedState {
            cache: Arc::new(ResultCache::new()),
            metrics: Arc::new(Metrics::new().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_health_before_first_result() {
        let Json(body) = healthcheck(State(state())).await;

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "status": "WarmingUp",
                "results_committed": 0,
                "last_result_age_ms": null
            })
        );
    }

    #[tokio::test]
    async fn test_health_counts_committed_results() {
        let state = state();
        state.cache.write(InferenceResult::empty());
        state.cache.write(InferenceResult::parse_error());

        let Json(body) = healthcheck(State(state)).await;
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["status"], "Available");
        assert_eq!(value["results_committed"], 2);
        assert!(value["last_result_age_ms"].is_u64());
    }
}
