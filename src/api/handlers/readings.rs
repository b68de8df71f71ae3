use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, warn};

use crate::api::models::readings::{
    ConsumptionLevel, IngestRequest, IngestResponse, LatestReadingResponse, LiveResponse,
    TierQuery, TierRowsResponse,
};
use crate::api::AppState;
use crate::reading::{parse_timestamp, Reading};
use crate::repositories::TierStore;
use crate::tier::Tier;

const DEFAULT_LIMIT: u32 = 60;
const MAX_LIMIT: u32 = 1000;

/// Remote ingestion: apply a reading decoded by a device-attached process.
pub async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> (StatusCode, Json<IngestResponse>) {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected malformed reading body");
            return (
                rejection.status(),
                Json(IngestResponse::failed(rejection.body_text())),
            );
        }
    };
    let timestamp = match parse_timestamp(&req.timestamp) {
        Ok(ts) => ts,
        Err(e) => {
            warn!(timestamp = %req.timestamp, "rejected pushed reading");
            return (StatusCode::BAD_REQUEST, Json(IngestResponse::failed(e.to_string())));
        }
    };
    let reading = Reading::new(timestamp, req.energy_nt, req.energy_ht, req.power);

    let Some(outcome) = state.pipeline.apply(reading).await else {
        return (
            StatusCode::OK,
            Json(IngestResponse {
                success: true,
                applied: false,
                committed: Vec::new(),
                error: None,
            }),
        );
    };

    let success = outcome.report.failed.is_empty();
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(IngestResponse {
            success,
            applied: true,
            committed: outcome
                .report
                .committed
                .iter()
                .map(|t| t.to_string())
                .collect(),
            error: (!success).then(|| {
                let failed: Vec<String> =
                    outcome.report.failed.iter().map(|t| t.to_string()).collect();
                format!("persisting failed for tier(s): {}", failed.join(", "))
            }),
        }),
    )
}

pub async fn get_latest(
    State(state): State<AppState>,
) -> Result<Json<LatestReadingResponse>, StatusCode> {
    let row = state
        .pipeline
        .aggregator()
        .store()
        .latest_raw()
        .await
        .map_err(|e| {
            error!(error = %e, "latest reading query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(LatestReadingResponse {
        timestamp: row.ts,
        energy_nt: row.energy_nt,
        energy_ht: row.energy_ht,
        power: row.power,
        level: row
            .power
            .map(|p| ConsumptionLevel::classify(p, &state.config.levels)),
    }))
}

pub async fn get_tier(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    Query(params): Query<TierQuery>,
) -> Result<Json<TierRowsResponse>, StatusCode> {
    let tier: Tier = tier.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let rows = state
        .pipeline
        .aggregator()
        .store()
        .recent(tier, limit)
        .await
        .map_err(|e| {
            error!(%tier, error = %e, "tier query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(TierRowsResponse {
        tier: tier.to_string(),
        rows,
    }))
}

pub async fn get_live(State(state): State<AppState>) -> Json<LiveResponse> {
    let latest = state.pipeline.latest();
    Json(LiveResponse {
        current_power: latest.and_then(|r| r.power),
        current_timestamp: latest.map(|r| r.timestamp),
        window: state.pipeline.window_snapshot(),
    })
}
