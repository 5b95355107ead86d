use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use warden_core::proposal::{ActionProposal, RiskHints};
use warden_core::rbac::Role;
use warden_core::types::ExecutorKind;
use warden_core::WardenError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct ProposeBody {
    pub kind: ExecutorKind,
    pub payload: serde_json::Value,
    pub org_id: String,
    #[serde(default)]
    pub risk_hints: RiskHints,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /api/proposals — submit a proposal; returns the resulting decision.
///
/// Policy runs synchronously: auto-approved proposals come back already
/// executed, denied ones come back rejected.
pub async fn propose(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProposeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let role = super::role_from_headers(&headers, Role::Operator)?;
    let result = tokio::task::spawn_blocking(move || {
        let mut proposal = ActionProposal::new(body.kind, body.payload, body.org_id);
        proposal.risk_hints = body.risk_hints;
        proposal.source_context.project_id = body.project_id;
        proposal.source_context.session_id = body.session_id;
        let decision = app.service.propose(proposal, role)?;
        Ok::<_, WardenError>(serde_json::json!({
            "status": decision.status,
            "decision": decision,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}

/// GET /api/proposals — proposal snapshots across all decisions, newest first.
pub async fn list_proposals(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = tokio::task::spawn_blocking(move || {
        let proposals: Vec<serde_json::Value> = app
            .service
            .decisions()
            .list()?
            .into_iter()
            .map(|d| {
                serde_json::json!({
                    "proposal": d.proposal,
                    "decision_id": d.id,
                    "decision_status": d.status,
                })
            })
            .collect();
        Ok::<_, WardenError>(serde_json::json!({ "proposals": proposals }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(result))
}
