pub mod error;
pub mod routes;
pub mod state;

use std::path::Path;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use warden_core::executor::ExecutorRegistry;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(root: &Path, registry: ExecutorRegistry) -> anyhow::Result<Router> {
    let app_state = state::AppState::new(root, registry)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        // Proposals
        .route("/api/proposals", post(routes::proposals::propose))
        .route("/api/proposals", get(routes::proposals::list_proposals))
        // Decisions
        .route("/api/decisions", get(routes::decisions::list_decisions))
        .route("/api/decisions/{id}", get(routes::decisions::get_decision))
        .route("/api/decisions/{id}/decide", post(routes::decisions::decide))
        .route("/api/decisions/{id}/execute", post(routes::decisions::execute))
        .route(
            "/api/decisions/{id}/explain",
            post(routes::decisions::explain_decision),
        )
        // Playbook templates and runs
        .route("/api/templates", post(routes::playbooks::create_template))
        .route("/api/templates", get(routes::playbooks::list_templates))
        .route("/api/runs", post(routes::playbooks::start_run))
        .route("/api/runs", get(routes::playbooks::list_runs))
        .route("/api/runs/{id}", get(routes::playbooks::get_run))
        .route("/api/runs/{id}/resume", post(routes::playbooks::resume_run))
        // Jobs
        .route("/api/jobs", get(routes::jobs::list_jobs))
        // Evidence ledger
        .route("/api/ledger", get(routes::ledger::list_partitions))
        .route("/api/ledger/{partition}", get(routes::ledger::list_entries))
        .route(
            "/api/ledger/{partition}/verify",
            get(routes::ledger::verify_partition),
        )
        .route(
            "/api/ledger/{partition}/export",
            get(routes::ledger::export),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    Ok(router)
}

/// Start the API server.
pub async fn serve(root: &Path, port: u16, registry: ExecutorRegistry) -> anyhow::Result<()> {
    let app = build_router(root, registry)?;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("warden API listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
