//! Buffer rotation hint endpoint
//!
//! Lets the upstream exporter announce a rotation so the file is picked up
//! without waiting for the next poll.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use tokio::sync::Notify;

pub async fn rotated(State(rotation): State<Arc<Notify>>) -> StatusCode {
    rotation.notify_one();
    StatusCode::ACCEPTED
}

pub fn routes(rotation: Arc<Notify>) -> Router<()> {
    Router::new()
        .route("/rotated", post(rotated))
        .with_state(rotation)
}
