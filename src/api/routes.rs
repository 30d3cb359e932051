//! Route handlers.
//!
//! Thin translation layer: query parsing, status-code mapping and the
//! fire-and-forget sink hand-off. A report that carries warnings is still
//! a 200; the warnings ride along in the body so the dashboard can show
//! them next to the numbers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::engine::report::{EngineError, ReconciliationEngine};
use crate::engine::sales_stats::SalesStatsService;
use crate::models::CombinedReport;
use crate::sink::ReportSink;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub sales: Arc<SalesStatsService>,
    pub sink: Arc<dyn ReportSink>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/traffic/sales", get(sales_report))
        .route("/api/traffic/combined-analytics", get(combined_analytics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn sales_report(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report = state
        .sales
        .build()
        .await
        .map_err(|err| ApiError::internal(format!("{err:#}")))?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    preset: Option<String>,
    date: Option<String>,
}

#[derive(Serialize)]
struct ReportResponse {
    updated_at: String,
    #[serde(flatten)]
    report: CombinedReport,
}

async fn combined_analytics(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let report = state
        .engine
        .build_report(query.preset.as_deref(), query.date.as_deref())
        .await?;

    // Delivery must not delay the response; a sink failure only logs.
    let sink = state.sink.clone();
    let saved = report.clone();
    tokio::spawn(async move {
        if let Err(err) = sink.save(&saved).await {
            warn!("report sink failed: {err:#}");
        }
    });

    Ok(Json(ReportResponse {
        updated_at: Utc::now().to_rfc3339(),
        report,
    })
    .into_response())
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::AllSourcesFailed(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
