use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use sensor_engine::settings::lookup;
use sensor_engine::{IngestOutcome, IngestRequest, PageRequest, fetch_page, parse_limit};

use super::AppState;
use crate::error::ApiError;

// ═══════════════════════════════════════════════════════════════
//  GET /health
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_health() -> &'static str {
    "OK"
}

// ═══════════════════════════════════════════════════════════════
//  POST /api/measurements
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_create_measurements(
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    match state.ingestor.ingest(req).await? {
        IngestOutcome::Persisted(records) => Ok((StatusCode::CREATED, Json(records)).into_response()),
        IngestOutcome::Skipped { reason } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "skipped", "reason": reason.as_str() })),
        )
            .into_response()),
    }
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/measurements?limit=&cursor=&sensor=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct ListParams {
    limit: Option<String>,
    cursor: Option<String>,
    sensor: Option<String>,
}

pub(crate) async fn handle_list_measurements(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let req = PageRequest {
        sensor_id: params.sensor,
        limit: parse_limit(params.limit.as_deref()),
        cursor: params.cursor,
    };
    let page = fetch_page(state.store.as_ref(), &req).await?;
    Ok(Json(page).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/sensors
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_sensors(State(state): State<AppState>) -> Result<Response, ApiError> {
    let sensors = state.store.sensors().await?;
    Ok(Json(sensors).into_response())
}

// ═══════════════════════════════════════════════════════════════
//  /api/settings
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_settings(State(state): State<AppState>) -> Result<Response, ApiError> {
    let items = state.settings_store.settings().await?;
    Ok(Json(items).into_response())
}

pub(crate) async fn handle_get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let item = lookup(state.settings_store.as_ref(), &key).await?;
    Ok(Json(item).into_response())
}

#[derive(Deserialize)]
pub(crate) struct SettingBody {
    value: serde_json::Value,
}

pub(crate) async fn handle_put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Result<Json<SettingBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    // Seconds may arrive as a JSON number or as a string.
    let value = match body.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(ApiError::BadRequest(format!(
                "value must be a string or a number, got {other}"
            )));
        }
    };
    let item = state
        .settings
        .update(state.settings_store.as_ref(), &key, &value)
        .await?;
    Ok(Json(item).into_response())
}
