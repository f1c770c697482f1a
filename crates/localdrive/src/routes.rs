use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;

/// File server routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        // Mutations
        .route("/create_folder", post(handlers::create_folder))
        .route("/rename", post(handlers::rename))
        .route("/delete", post(handlers::delete))
        // Upload size is enforced while spooling, not by the extractor
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/details", post(handlers::details))
        // Reads
        .route("/download/{*path}", get(handlers::download))
        .route("/stream/{*path}", get(handlers::stream))
}

/// Full application router with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(file_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
