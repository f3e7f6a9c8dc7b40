//! Health check endpoint

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::data::ledger::Ledger;
use crate::domain::pipeline::{PipelineStats, PipelineStatsSnapshot};
use crate::domain::rollup::{RollupEngine, RollupStatsSnapshot};
use crate::domain::upload::{UploadStatsSnapshot, Uploader};

#[derive(Clone)]
pub struct HealthState {
    pub pipeline: Arc<PipelineStats>,
    pub uploader: Arc<Uploader>,
    pub rollups: Arc<RollupEngine>,
    pub ledger: Arc<Ledger>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pipeline: PipelineStatsSnapshot,
    pub uploads: UploadStatsSnapshot,
    pub rollups: RollupStatsSnapshot,
    pub ledger_objects: usize,
}

/// Health check endpoint
pub async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            pipeline: state.pipeline.snapshot(),
            uploads: state.uploader.stats(),
            rollups: state.rollups.stats(),
            ledger_objects: state.ledger.len(),
        }),
    )
}
