use axum::extract::{Path, Query, State};
use axum::Json;
use warden_core::export::{export_partition, ExportFormat, Redactor};
use warden_core::WardenError;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/ledger — known partitions.
pub async fn list_partitions(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let partitions = app.ledger.partitions()?;
        Ok::<_, WardenError>(serde_json::json!({ "partitions": partitions }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/ledger/:partition — entries in chain order.
pub async fn list_entries(
    State(app): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let entries = app.ledger.entries(&partition)?;
        Ok::<_, WardenError>(serde_json::json!({ "entries": entries }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/ledger/:partition/verify — recompute the hash chain.
pub async fn verify_partition(
    State(app): State<AppState>,
    Path(partition): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let valid = app.ledger.verify_chain(&partition)?;
        let entries = app.ledger.entries(&partition)?.len();
        Ok::<_, WardenError>(serde_json::json!({
            "partition": partition,
            "valid": valid,
            "entries": entries,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct ExportParams {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// GET /api/ledger/:partition/export?format=json|csv — redacted export.
pub async fn export(
    State(app): State<AppState>,
    Path(partition): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<String, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let format: ExportFormat = params.format.parse()?;
        let redactor = Redactor::new(&app.config.redact_keys)?;
        export_partition(&app.ledger, &partition, format, &redactor)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(result)
}
