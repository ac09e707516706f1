use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    coordinator::{ScanCoordinator, ScanState},
    error::ScanError,
    types::ResetResponse,
};

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<ScanCoordinator>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: impl ToString) -> Response {
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

fn scan_error_response(err: ScanError) -> Response {
    error!(error = %err, "request failed");
    match err {
        ScanError::NoActiveScan | ScanError::Superseded => error_response(StatusCode::CONFLICT, err),
        ScanError::InvalidUrl(_) => error_response(StatusCode::BAD_REQUEST, err),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}

/// JSON API over a coordinator, mounted under `/api`.
pub fn router(coordinator: Arc<ScanCoordinator>) -> Router {
    let state = AppState { coordinator };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/urls", get(get_urls))
        .route("/scan", post(post_scan))
        .route("/scan/batch", post(post_batch))
        .route("/results", get(get_results))
        .route("/reset", post(post_reset))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `bind` until `shutdown` is cancelled.
pub async fn spawn_server(
    bind: &str,
    coordinator: Arc<ScanCoordinator>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(coordinator);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let state: ScanState = app.coordinator.state().await;
    (StatusCode::OK, Json(state))
}

async fn get_urls(State(app): State<AppState>) -> Response {
    match app.coordinator.discover_urls().await {
        Ok(urls) => (StatusCode::OK, Json(urls)).into_response(),
        Err(e) => scan_error_response(e),
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> Response {
    if req.urls.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No URLs provided for scanning.");
    }
    match app.coordinator.scan_urls(&req.urls).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => scan_error_response(e),
    }
}

async fn post_batch(State(app): State<AppState>, Json(req): Json<BatchRequest>) -> Response {
    let coordinator = &app.coordinator;
    // A page at offset zero begins a fresh scan.
    if req.offset == 0 {
        if let Err(e) = coordinator.start_scan().await {
            return scan_error_response(e);
        }
    }
    let batch_size = req
        .batch_size
        .filter(|&n| n > 0)
        .unwrap_or(coordinator.config().batch_size);
    match coordinator.process_batch(batch_size, req.offset).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => scan_error_response(e),
    }
}

async fn get_results(State(app): State<AppState>) -> Response {
    match app.coordinator.get_results().await {
        Ok(summary) if summary.has_data => (StatusCode::OK, Json(summary)).into_response(),
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => scan_error_response(e),
    }
}

async fn post_reset(State(app): State<AppState>) -> Response {
    info!("reset scan request received");
    match app.coordinator.reset().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ResetResponse {
                success: true,
                message: "TLS scan data has been reset.".into(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "reset failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ResetResponse {
                    success: false,
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
