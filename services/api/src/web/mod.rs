pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::{require_user, CurrentUser, USER_ID_HEADER};
use rest::*;
use state::AppState;

/// Builds the learner-facing API router. Every route requires the user id header.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/courses/{course_id}/enrollment",
            get(enrollment_status_handler)
                .post(enroll_handler)
                .delete(unenroll_handler),
        )
        .route("/courses/{course_id}/outline", get(course_outline_handler))
        .route("/courses/{course_id}/current-lesson", get(current_lesson_handler))
        .route(
            "/courses/{course_id}/lessons/{lesson_id}/progress",
            get(lesson_progress_handler),
        )
        .route(
            "/courses/{course_id}/lessons/{lesson_id}/complete",
            post(mark_complete_handler).delete(mark_incomplete_handler),
        )
        .route(
            "/courses/{course_id}/lessons/{lesson_id}/watch",
            put(update_watch_progress_handler),
        )
        .route(
            "/courses/{course_id}/lessons/{lesson_id}/adjacent",
            get(adjacent_lessons_handler),
        )
        .route("/catalog/{slug}/outline", get(course_outline_by_slug_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/payments/{intent_id}/confirm", post(confirm_payment_handler))
        .layer(axum_middleware::from_fn(require_user))
        .with_state(state)
}
