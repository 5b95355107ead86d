use axum::extract::State;
use axum::Json;
use warden_core::WardenError;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/jobs — the full job queue, oldest first.
pub async fn list_jobs(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let jobs = app.queue.list()?;
        Ok::<_, WardenError>(serde_json::json!({ "jobs": jobs }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}
