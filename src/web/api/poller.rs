use axum::{extract::State, http::StatusCode, Json};

use crate::poller::{poll_once, PollStatus, TickOutcome};
use crate::sample::Sample;
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::state::AppState;

#[utoipa::path(
    post,
    path = "/api/fetch",
    responses(
        (status = 201, description = "Sample fetched and stored", body = Sample),
        (status = 502, description = "Upstream unavailable or payload unusable", body = ErrorResponse),
        (status = 500, description = "Storage error", body = ErrorResponse)
    ),
    tag = "poller"
)]
pub async fn fetch_now(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Sample>)> {
    // Manual fetches are not subject to the day quota.
    match poll_once(state.source.as_ref(), state.store.as_ref(), None).await? {
        TickOutcome::Stored(sample) => {
            log::info!("Manual fetch stored sample at {}", sample.captured_at);
            Ok((StatusCode::CREATED, Json(sample)))
        }
        TickOutcome::QuotaReached { .. } => {
            Err(ApiError::Internal("quota applied to a manual fetch".into()))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/poller/status",
    responses(
        (status = 200, description = "Poll loop counters", body = PollStatus)
    ),
    tag = "poller"
)]
pub async fn status(State(state): State<AppState>) -> Json<PollStatus> {
    Json(state.poller.status())
}
