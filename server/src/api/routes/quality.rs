//! Quality report endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::types::ApiError;
use crate::domain::quality::{QualityMonitor, QualityReport};

/// Latest report produced by the periodic monitor
pub async fn latest_report(
    State(monitor): State<Arc<QualityMonitor>>,
) -> Result<Json<QualityReport>, ApiError> {
    let report = monitor.latest().ok_or_else(|| {
        ApiError::not_found(
            "NO_REPORT",
            "No quality report yet; POST /api/v1/quality/run to run the checks now",
        )
    })?;
    Ok(Json(QualityReport::clone(&report)))
}

/// Run every check now and return the fresh report
pub async fn run_report(State(monitor): State<Arc<QualityMonitor>>) -> Json<QualityReport> {
    Json(QualityReport::clone(&monitor.run()))
}

pub fn routes(monitor: Arc<QualityMonitor>) -> Router<()> {
    Router::new()
        .route("/", get(latest_report))
        .route("/run", post(run_report))
        .with_state(monitor)
}
