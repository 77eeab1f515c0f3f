use axum::extract::State;

use crate::query;
use crate::web::api::error::ApiResult;
use crate::web::state::AppState;

use super::templates::{DatabaseTemplate, DayOption, IndexTemplate};

pub async fn index(State(state): State<AppState>) -> ApiResult<IndexTemplate> {
    let store = state.store.as_ref();
    Ok(IndexTemplate {
        interval_seconds: state.config.poll.interval.as_secs(),
        backend: state.config.storage.backend.to_string(),
        total: store.count()?,
        latest: store.latest()?.map(|s| s.captured_at),
    })
}

pub async fn database(State(state): State<AppState>) -> ApiResult<DatabaseTemplate> {
    let days = query::days(state.store.as_ref())?
        .into_iter()
        .rev()
        .map(|d| DayOption {
            value: d.day.to_string(),
            label: d.label,
            count: d.count,
        })
        .collect();

    Ok(DatabaseTemplate {
        days,
        per_page: query::DEFAULT_PER_PAGE,
    })
}
