pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::applications::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Answer videos are far larger than axum's 2 MB default.
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_handler))
        // Answer scoring
        .route(
            "/api/v1/answers/score",
            post(handlers::handle_score_answer).layer(upload_limit),
        )
        // Applications
        .route(
            "/api/v1/jobs/:job_id/applications",
            post(handlers::handle_submit_application)
                .get(handlers::handle_list_job_applications)
                .layer(upload_limit),
        )
        .route(
            "/api/v1/candidate/applications",
            get(handlers::handle_list_candidate_applications),
        )
        .route("/api/v1/applications/:id", get(handlers::handle_get_application))
        .route(
            "/api/v1/applications/:id/aggregate",
            get(handlers::handle_aggregate),
        )
        .route("/api/v1/applications/:id/status", put(handlers::handle_decide))
        .route(
            "/api/v1/applications/:id/revaluation",
            post(handlers::handle_request_revaluation).put(handlers::handle_resolve_revaluation),
        )
        // Archived answer videos
        .route("/api/v1/videos/*key", get(handlers::handle_get_video))
        .with_state(state)
}
