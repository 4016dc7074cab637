use crate::dtos::HealthResponse;
use crate::services::metrics::get_metrics;
use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{SecondsFormat, Utc};

/// GET /v1/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
