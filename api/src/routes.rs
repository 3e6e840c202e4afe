use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Proc catalogue
        .route("/procs", get(handlers::procs::list_procs))
        .route("/procs/:name", get(handlers::procs::get_proc))
        // Executions
        .route(
            "/executions",
            post(handlers::executions::create_execution)
                .get(handlers::executions::list_executions),
        )
        .route(
            "/executions/:name",
            get(handlers::executions::get_execution),
        )
        .route(
            "/executions/:name/status",
            get(handlers::executions::get_execution_status),
        )
        .route(
            "/executions/:name/logs",
            get(handlers::executions::stream_execution_logs),
        )
        // Schedules
        .route(
            "/schedules",
            post(handlers::schedules::create_schedule).get(handlers::schedules::list_schedules),
        )
        .route(
            "/schedules/:id",
            get(handlers::schedules::get_schedule).delete(handlers::schedules::delete_schedule),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
