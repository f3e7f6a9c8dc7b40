//! Read-only rollup query endpoint
//!
//! `GET /api/v1/rollups?tier=hourly&from=..&to=..&metric=..&entity=..&dim.region=eu&quantile=0.95`
//!
//! `dim.<key>=<value>` parameters select one dimension set exactly; a value of
//! `*` matches any value of that key. Without `dim.` parameters rows of every
//! dimension set are returned.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::types::{ApiError, parse_timestamp_param};
use crate::data::rollups::RollupFilter;
use crate::domain::records::Labels;
use crate::domain::rollup::{RollupEngine, RollupView, Tier};

const DIMENSION_PREFIX: &str = "dim.";

#[derive(Debug, Clone, PartialEq)]
pub struct RollupQuery {
    pub filter: RollupFilter,
    pub quantile: Option<f64>,
}

#[derive(Serialize)]
pub struct RollupResponse {
    pub tier: Tier,
    pub quantile: Option<f64>,
    pub count: usize,
    pub rows: Vec<RollupView>,
}

/// Build a filter from raw query pairs
pub fn parse_rollup_query(params: &[(String, String)]) -> Result<RollupQuery, ApiError> {
    let mut filter = RollupFilter::tier(Tier::Hourly);
    let mut quantile = None;
    let mut from = None;
    let mut to = None;
    let mut dimensions: Option<Labels> = None;

    for (key, value) in params {
        match key.as_str() {
            "tier" => {
                filter.tier = value
                    .parse()
                    .map_err(|e: String| ApiError::bad_request("INVALID_TIER", e))?;
            }
            "from" => from = Some(value.as_str()),
            "to" => to = Some(value.as_str()),
            "metric" => filter.metric = Some(value.clone()),
            "entity" => filter.entity = Some(value.clone()),
            "quantile" => {
                let q: f64 = value.parse().map_err(|_| {
                    ApiError::bad_request("INVALID_QUANTILE", format!("Invalid quantile: {}", value))
                })?;
                if !(0.0..=1.0).contains(&q) {
                    return Err(ApiError::bad_request(
                        "INVALID_QUANTILE",
                        format!("Quantile must be within [0, 1], got {}", q),
                    ));
                }
                quantile = Some(q);
            }
            other => match other.strip_prefix(DIMENSION_PREFIX) {
                Some(dim) if !dim.is_empty() => {
                    dimensions.get_or_insert_with(Labels::new).insert(dim, value.clone());
                }
                _ => {
                    return Err(ApiError::bad_request(
                        "UNKNOWN_PARAMETER",
                        format!("Unknown query parameter: {}", other),
                    ));
                }
            },
        }
    }

    filter.from = parse_timestamp_param("from", from)?;
    filter.to = parse_timestamp_param("to", to)?;
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && from >= to
    {
        return Err(ApiError::bad_request(
            "INVALID_RANGE",
            "'from' must be earlier than 'to'",
        ));
    }
    filter.dimensions = dimensions;

    Ok(RollupQuery { filter, quantile })
}

pub async fn query_rollups(
    State(engine): State<Arc<RollupEngine>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<RollupResponse>, ApiError> {
    let query = parse_rollup_query(&params)?;
    let rows = engine.query(&query.filter, query.quantile);
    tracing::debug!(tier = %query.filter.tier, rows = rows.len(), "Rollup query");

    Ok(Json(RollupResponse {
        tier: query.filter.tier,
        quantile: query.quantile,
        count: rows.len(),
        rows,
    }))
}

pub fn routes(engine: Arc<RollupEngine>) -> Router<()> {
    Router::new()
        .route("/", get(query_rollups))
        .with_state(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_to_hourly() {
        let query = parse_rollup_query(&[]).unwrap();
        assert_eq!(query.filter, RollupFilter::tier(Tier::Hourly));
        assert_eq!(query.quantile, None);
    }

    #[test]
    fn test_full_query() {
        let query = parse_rollup_query(&params(&[
            ("tier", "daily"),
            ("from", "2024-01-01T00:00:00Z"),
            ("to", "2024-01-02T00:00:00Z"),
            ("metric", "latency"),
            ("entity", "api-1"),
            ("dim.region", "eu"),
            ("dim.host", "*"),
            ("quantile", "0.95"),
        ]))
        .unwrap();

        assert_eq!(query.filter.tier, Tier::Daily);
        assert_eq!(query.filter.from, Some(1_704_067_200_000));
        assert_eq!(query.filter.to, Some(1_704_153_600_000));
        assert_eq!(query.filter.metric.as_deref(), Some("latency"));
        assert_eq!(query.filter.entity.as_deref(), Some("api-1"));
        let dims = query.filter.dimensions.unwrap();
        assert_eq!(dims.get("region"), Some("eu"));
        assert_eq!(dims.get("host"), Some("*"));
        assert_eq!(query.quantile, Some(0.95));
    }

    #[test]
    fn test_rejects_bad_input() {
        for bad in [
            vec![("tier", "weekly")],
            vec![("quantile", "1.5")],
            vec![("quantile", "high")],
            vec![("from", "2024-01-02T00:00:00Z"), ("to", "2024-01-01T00:00:00Z")],
            vec![("from", "not-a-time")],
            vec![("limit", "10")],
            vec![("dim.", "x")],
        ] {
            assert!(
                matches!(parse_rollup_query(&params(&bad)), Err(ApiError::BadRequest { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
