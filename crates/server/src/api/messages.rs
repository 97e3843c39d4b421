//! Publish endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use bytes::Bytes;
use serde::Deserialize;

use crate::state::AppState;

pub const SUCCESS_MESSAGE: &str = "Message sent successfully!";

#[derive(Debug, Deserialize)]
pub struct SendParams {
    /// Required; `?key=` is an empty key, a missing `key` is rejected with 400.
    pub key: String,
}

/// `POST /api/messages?key=<key>` with the raw body as payload.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SendParams>,
    body: Bytes,
) -> Result<&'static str, (StatusCode, String)> {
    state
        .publisher
        .send(&params.key, &body)
        .await
        .map(|_| SUCCESS_MESSAGE)
        .map_err(|e| {
            (
                StatusCode::BAD_GATEWAY,
                format!("Failed to send message: {e}"),
            )
        })
}
