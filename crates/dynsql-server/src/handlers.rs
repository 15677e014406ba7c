use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use dynsql_core::{
    ExternalDefinitions, QueryResponse, RenderRequest, ServiceError, load_definitions_file,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
struct QuerySuccess {
    status: &'static str,
    #[serde(flatten)]
    response: QueryResponse,
}

/// POST /api/query
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    if request.biz_type.trim().is_empty() {
        return Err(ApiError::invalid_input("biz_type must not be empty"));
    }

    info!(biz_type = %request.biz_type, "Received query request");
    let response = state
        .service
        .execute(state.executor.as_ref(), &request)
        .await?;

    Ok(Json(QuerySuccess {
        status: "success",
        response,
    }))
}

/// GET /api/templates
pub async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    let templates = state.service.list_templates();
    Json(json!({
        "status": "success",
        "count": templates.len(),
        "templates": templates,
    }))
}

/// GET /api/sample/{biz_type}
pub async fn sample(
    State(state): State<AppState>,
    Path(biz_type): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sample = state
        .service
        .sample(&biz_type)
        .ok_or(ServiceError::UnknownBizType(biz_type))?;

    Ok(Json(json!({
        "status": "success",
        "sample_request": {
            "biz_type": sample.biz_type,
            "parameters": sample.parameters,
        },
        "description": sample.description,
        "required_params": sample.required_params,
        "optional_params": sample.optional_params,
    })))
}

/// GET /api/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "cache_stats": state.service.cache_stats(),
    }))
}

/// POST /api/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.service.clear_cache();
    Json(json!({
        "status": "success",
        "message": "Cache cleared successfully",
    }))
}

/// POST /api/templates/reload
pub async fn reload_templates(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let external = match state.templates_path.as_deref() {
        Some(path) => load_definitions_file(path).map_err(|e| {
            warn!(error = %e, "Template reload failed");
            ApiError::internal(e.to_string())
        })?,
        None => ExternalDefinitions::new(),
    };

    let report = state.service.reload_templates(external);
    Ok(Json(json!({
        "status": "success",
        "loaded": report.loaded,
        "overridden": report.overridden,
        "skipped": report.skipped,
    })))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status, health, database) = match state.executor.ping().await {
        Ok(()) => (StatusCode::OK, "healthy", "connected".to_string()),
        Err(e) => {
            warn!(error = %e, "Health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "degraded",
                format!("unhealthy: {e}"),
            )
        }
    };

    let body: Value = json!({
        "status": health,
        "service": "dynsql",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    });
    (status, Json(body))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("The requested resource was not found")
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed("The method is not allowed for the requested URL".into())
}
