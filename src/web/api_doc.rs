use utoipa::OpenApi;

use super::api::error::ErrorResponse;
use super::api::{poller, samples};

#[derive(OpenApi)]
#[openapi(
    paths(
        samples::latest,
        samples::recent,
        samples::last_days,
        samples::last_three_days,
        samples::records,
        samples::days,
        samples::stats,
        samples::download_csv,
        poller::fetch_now,
        poller::status,
    ),
    components(
        schemas(
            ErrorResponse,
            crate::sample::Sample,
            crate::sample::DayBucket,
            crate::store::SortOrder,
            crate::query::RecordsPage,
            crate::query::DayStats,
            crate::query::Stats,
            crate::poller::PollStatus,
        )
    ),
    info(
        title = "ISS Tracker API",
        description = "Recorded ISS ground-track samples, exports and poller control",
        version = "0.1.0"
    ),
    tags(
        (name = "samples", description = "Stored position samples"),
        (name = "export", description = "CSV downloads"),
        (name = "poller", description = "Background poll loop")
    )
)]
pub struct ApiDoc;
