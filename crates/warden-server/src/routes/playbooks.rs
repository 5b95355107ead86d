use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;
use warden_core::playbook::PlaybookTemplate;
use warden_core::WardenError;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/templates — validate and store a playbook template.
pub async fn create_template(
    State(app): State<AppState>,
    Json(template): Json<PlaybookTemplate>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        app.engine.templates().save(&template)?;
        Ok::<_, WardenError>(serde_json::json!({
            "id": template.id,
            "name": template.name,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/templates
pub async fn list_templates(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let templates = app.engine.templates().list()?;
        Ok::<_, WardenError>(serde_json::json!({ "templates": templates }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct StartRunBody {
    pub template_id: Uuid,
    pub org_id: String,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// POST /api/runs — start a playbook run; advancement happens through the
/// job queue, so the returned run is still at its entry step.
pub async fn start_run(
    State(app): State<AppState>,
    Json(body): Json<StartRunBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let run = app
            .engine
            .start(body.template_id, &body.org_id, body.variables)?;
        Ok::<_, WardenError>(serde_json::json!({ "run": run }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/runs
pub async fn list_runs(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let runs = app.engine.runs().list()?;
        Ok::<_, WardenError>(serde_json::json!({ "runs": runs }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/runs/:id
pub async fn get_run(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let run = app.engine.runs().get(id)?;
        Ok::<_, WardenError>(serde_json::json!({ "run": run }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct ResumeBody {
    pub event: String,
}

/// POST /api/runs/:id/resume — deliver an external event to a waiting run.
pub async fn resume_run(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResumeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let run = app.engine.resume(id, &body.event)?;
        Ok::<_, WardenError>(serde_json::json!({ "run": run }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}
