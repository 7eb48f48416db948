use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::QuizError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/quizzes", quiz_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn quiz_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::quizzes::list_quizzes).post(handlers::quizzes::create_quiz),
        )
        .route(
            "/{id}",
            get(handlers::quizzes::get_quiz).delete(handlers::quizzes::delete_quiz),
        )
        .route("/{id}/start", post(handlers::quizzes::start_quiz))
        .route("/{id}/answer", post(handlers::quizzes::submit_answer))
        .route("/{id}/pause", post(handlers::quizzes::pause_quiz))
        .route("/{id}/resume", post(handlers::quizzes::resume_quiz))
        .route("/{id}/finish", post(handlers::quizzes::finish_quiz))
        .route("/{id}/expire", post(handlers::quizzes::expire_quiz))
        .route("/{id}/stream", get(handlers::sse::quiz_stream))
}
