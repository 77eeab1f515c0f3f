use axum::{routing::get, routing::post, Router};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::poller::{Poller, PollerError};
use crate::source::{FetchError, HttpPositionSource};
use crate::store::{open_store, seed, StoreError};

use super::api::poller as poller_handlers;
use super::api::samples as sample_handlers;
use super::api_doc::ApiDoc;
use super::config::Config;
use super::state::AppState;
use super::ui::handlers as ui_handlers;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to open sample store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build upstream client: {0}")]
    Source(#[from] FetchError),
    #[error("failed to start poller: {0}")]
    Poller(#[from] PollerError),
    #[error("server IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_router(state: AppState) -> Router {
    let static_dir = state.config.web.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // UI routes
        .route("/", get(ui_handlers::index))
        .route("/database", get(ui_handlers::database))
        // Sample API endpoints
        .route("/api/latest", get(sample_handlers::latest))
        .route("/api/recent", get(sample_handlers::recent))
        .route("/api/last-days", get(sample_handlers::last_days))
        .route("/api/last3days", get(sample_handlers::last_three_days))
        .route("/api/records", get(sample_handlers::records))
        .route("/api/all-records", get(sample_handlers::records))
        .route("/api/days", get(sample_handlers::days))
        .route("/api/stats", get(sample_handlers::stats))
        .route("/api/download-csv", get(sample_handlers::download_csv))
        // Poller endpoints
        .route("/api/fetch", post(poller_handlers::fetch_now))
        .route("/api/poller/status", get(poller_handlers::status))
        // Static files
        .nest_service("/static", ServeDir::new(static_dir))
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<(), ServerError> {
    let store = open_store(&config.storage)?;

    if config.seed.enabled {
        let spacing = chrono::Duration::from_std(config.poll.interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(86));
        let added = seed::seed_if_empty(store.as_ref(), Utc::now(), config.seed.days, spacing)?;
        if added > 0 {
            log::info!("Seeded {} synthetic samples over {} days", added, config.seed.days);
        }
    }

    let source = Arc::new(HttpPositionSource::new(
        config.source.url.clone(),
        config.source.timeout,
    )?);
    log::info!("Polling {} every {:?}", source.url(), config.poll.interval);

    let mut poller = Poller::new();
    poller.start(source.clone(), store.clone(), config.poll_settings())?;

    let bind_addr = config.web.bind.clone();
    let state = AppState {
        config: Arc::new(config),
        store,
        source,
        poller: poller.monitor(),
    };
    let app = build_router(state);

    log::info!("Starting server on {}", bind_addr);

    let served = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(ServerError::from),
        Err(e) => Err(ServerError::from(e)),
    };

    poller.stop().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}
