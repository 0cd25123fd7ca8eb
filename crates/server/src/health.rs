use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use esibot_core::StatusCache;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    cache: Arc<StatusCache>,
    version: String,
}

impl HealthState {
    pub fn new(cache: Arc<StatusCache>, version: impl Into<String>) -> Self {
        Self { cache, version: version.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub route_status: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let route_status = route_status_check(&state);
    let ready = route_status.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "esibot-server runtime initialized".to_owned(),
        },
        route_status,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn route_status_check(state: &HealthState) -> HealthCheck {
    match state.cache.get(&state.version) {
        Some(snapshot) => HealthCheck {
            status: "ready",
            detail: format!(
                "{} routes for `{}` as of {}",
                snapshot.entries.len(),
                state.version,
                snapshot.fetched_at.to_rfc3339()
            ),
        },
        None => HealthCheck {
            status: "degraded",
            detail: format!("no route status snapshot for `{}` yet", state.version),
        },
    }
}
