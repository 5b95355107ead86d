use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;
use warden_core::explain::{explain, DecisionContext};
use warden_core::WardenError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize, Default)]
pub struct ListParams {
    #[serde(default)]
    pub include_archived: bool,
}

/// GET /api/decisions — all decisions, newest first. Archived records are
/// hidden unless `include_archived=true`.
pub async fn list_decisions(
    State(app): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let decisions: Vec<_> = app
            .service
            .decisions()
            .list()?
            .into_iter()
            .filter(|d| params.include_archived || d.archived_at.is_none())
            .collect();
        Ok::<_, WardenError>(serde_json::json!({ "decisions": decisions }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/decisions/:id
pub async fn get_decision(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let decision = app.service.decisions().get(id)?;
        let execution = app.service.adapter().executions().get(id)?;
        Ok::<_, WardenError>(serde_json::json!({
            "decision": decision,
            "execution": execution,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct DecideBody {
    pub approve: bool,
    #[serde(default)]
    pub justification: Option<String>,
}

/// POST /api/decisions/:id/decide — human approval or rejection.
///
/// The caller comes from `x-warden-role` / `x-warden-caller` /
/// `x-warden-orgs`; RBAC failures map to 403, a repeat decide to 409.
pub async fn decide(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<DecideBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = super::caller_from_headers(&headers)?;
    let result = tokio::task::spawn_blocking(move || {
        let decision = app
            .service
            .decide(id, &caller, body.approve, body.justification)?;
        Ok::<_, WardenError>(serde_json::json!({
            "status": decision.status,
            "decision": decision,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

#[derive(serde::Deserialize, Default)]
pub struct ExecuteParams {
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /api/decisions/:id/execute — execute an approved decision, or with
/// `?dry_run=true` preview it without side effects.
pub async fn execute(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ExecuteParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let execution = app.service.execute_opts(id, params.dry_run)?;
        Ok::<_, WardenError>(serde_json::json!({
            "execution": execution,
            "dry_run": params.dry_run,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// POST /api/decisions/:id/explain — explanation from the decision record
/// plus whatever context facets the caller supplies.
pub async fn explain_decision(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(context): Json<DecisionContext>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let decision = app.service.decisions().get(id)?;
        let explanation = explain(&decision, &context);
        Ok::<_, WardenError>(serde_json::json!({ "explanation": explanation }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}
