pub mod attempt;
pub mod health;
pub mod session;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{auth::require_student, rate_limit};
use crate::AppState;

/// Full application router. Exam routes require a student identity and are
/// rate limited per client.
pub fn router(state: AppState, public_rps: u32) -> Router {
    let exam_api = Router::new()
        .route("/api/assessments/:assessment_id/begin", post(session::begin))
        .route("/api/sessions/:token/device-checks", post(session::record_device_check))
        .route("/api/sessions/:token/start", post(session::start))
        .route("/api/sessions/:token/heartbeat", post(session::heartbeat))
        .route("/api/sessions/:token/violations", post(session::report_violation))
        .route("/api/sessions/:token/questions/:index", get(session::get_question))
        .route("/api/sessions/:token/answers", put(session::save_answer))
        .route("/api/sessions/:token/flags", post(session::flag_question))
        .route("/api/sessions/:token/run", post(session::try_run))
        .route("/api/sessions/:token/code-submissions", post(session::final_submit))
        .route("/api/attempts/:attempt_id/submit-preview", get(attempt::submit_preview))
        .route("/api/attempts/:attempt_id/submit", post(attempt::submit))
        .layer(from_fn(require_student))
        .layer(from_fn_with_state(
            rate_limit::new_rps_state(public_rps),
            rate_limit::rps_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(exam_api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
