use axum::{
    middleware,
    routing::{delete, get, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        // Collection
        .route(
            "/recommendations",
            get(handlers::list_recommendations).post(handlers::create_recommendation),
        )
        .route("/recommendations/reset", delete(handlers::reset_recommendations))
        // Single recommendation
        .route(
            "/recommendations/:id",
            get(handlers::get_recommendation)
                .put(handlers::update_recommendation)
                .delete(handlers::delete_recommendation),
        )
        .route("/recommendations/:id/dislike", put(handlers::dislike_recommendation))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .with_state(state)
}
