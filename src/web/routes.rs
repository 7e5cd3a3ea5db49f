//! Web API router construction.

use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::web::{flywheel, status};

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let flywheel_router = Router::new()
        .route("/internal", post(flywheel::trigger_minute_pass))
        .route(
            "/internal/users/{user_id}",
            post(flywheel::trigger_forced_user),
        );

    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .nest("/flywheel", flywheel_router)
        .with_state(app_state)
        .layer((
            TraceLayer::new_for_http(),
            TimeoutLayer::new(Duration::from_secs(30)),
        ))
}
