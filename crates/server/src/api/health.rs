use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub broker: &'static str,
    pub topic: String,
    pub consumer_group: String,
    /// Listener state, or `"disabled"` when no listener runs in this process.
    pub listener: &'static str,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        broker: state.broker,
        topic: state.messaging.topic.clone(),
        consumer_group: state.messaging.consumer_group.clone(),
        listener: state
            .listener_state()
            .map(|s| s.as_str())
            .unwrap_or("disabled"),
    })
}
