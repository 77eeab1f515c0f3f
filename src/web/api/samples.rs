use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::query::{self, DayStats, ExportSelection, RecordsPage, RecordsQuery, Stats};
use crate::sample::Sample;
use crate::web::api::error::{ApiResult, ErrorResponse};
use crate::web::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecentParams {
    /// Number of samples, 1 to 5000. Defaults to 100.
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LastDaysParams {
    /// Number of day buckets with data, 1 to 366. Defaults to 3.
    pub days: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CsvParams {
    /// Day bucket `YYYY-MM-DD` to export.
    pub day: Option<String>,
    /// `1` or `true` exports every day and ignores `day`.
    pub all: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/latest",
    responses(
        (status = 200, description = "Most recent sample", body = Sample),
        (status = 404, description = "No samples stored yet", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn latest(State(state): State<AppState>) -> ApiResult<Json<Sample>> {
    Ok(Json(query::latest(state.store.as_ref())?))
}

#[utoipa::path(
    get,
    path = "/api/recent",
    params(RecentParams),
    responses(
        (status = 200, description = "Most recent samples, oldest first", body = Vec<Sample>),
        (status = 400, description = "Invalid limit", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> ApiResult<Json<Vec<Sample>>> {
    Ok(Json(query::recent(state.store.as_ref(), params.limit)?))
}

#[utoipa::path(
    get,
    path = "/api/last-days",
    params(LastDaysParams),
    responses(
        (status = 200, description = "Samples of the newest day buckets, oldest first", body = Vec<Sample>),
        (status = 400, description = "Invalid day count", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn last_days(
    State(state): State<AppState>,
    Query(params): Query<LastDaysParams>,
) -> ApiResult<Json<Vec<Sample>>> {
    Ok(Json(query::last_days(state.store.as_ref(), params.days)?))
}

#[utoipa::path(
    get,
    path = "/api/last3days",
    responses(
        (status = 200, description = "Samples of the newest three day buckets", body = Vec<Sample>)
    ),
    tag = "samples"
)]
pub async fn last_three_days(State(state): State<AppState>) -> ApiResult<Json<Vec<Sample>>> {
    Ok(Json(query::last_days(state.store.as_ref(), Some(3))?))
}

#[utoipa::path(
    get,
    path = "/api/records",
    params(RecordsQuery),
    responses(
        (status = 200, description = "One page of a day's samples", body = RecordsPage),
        (status = 400, description = "Invalid day or paging parameters", body = ErrorResponse)
    ),
    tag = "samples"
)]
pub async fn records(
    State(state): State<AppState>,
    Query(params): Query<RecordsQuery>,
) -> ApiResult<Json<RecordsPage>> {
    Ok(Json(query::list_records(state.store.as_ref(), &params)?))
}

#[utoipa::path(
    get,
    path = "/api/days",
    responses(
        (status = 200, description = "Day buckets with sample counts", body = Vec<DayStats>)
    ),
    tag = "samples"
)]
pub async fn days(State(state): State<AppState>) -> ApiResult<Json<Vec<DayStats>>> {
    Ok(Json(query::days(state.store.as_ref())?))
}

#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Aggregate counts", body = Stats)
    ),
    tag = "samples"
)]
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(query::stats(state.store.as_ref())?))
}

#[utoipa::path(
    get,
    path = "/api/download-csv",
    params(CsvParams),
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 400, description = "Malformed day", body = ErrorResponse),
        (status = 404, description = "Nothing to export", body = ErrorResponse)
    ),
    tag = "export"
)]
pub async fn download_csv(
    State(state): State<AppState>,
    Query(params): Query<CsvParams>,
) -> ApiResult<impl IntoResponse> {
    let selection = ExportSelection::from_params(params.day.as_deref(), params.all.as_deref())?;
    let samples = query::export(state.store.as_ref(), selection)?;
    let body = query::render_csv(&samples)?;

    let filename = format!("iss_data_{}.csv", Utc::now().format("%Y%m%d%H%M%S"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    ))
}
