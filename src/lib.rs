pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::storage::ChunkedStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub store: Arc<ChunkedStore>,
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // The router-level limit sits above the upload cap (multipart framing
    // rides on top of the payload); the exact maximum is enforced while
    // spooling the file field.
    let body_limit = DefaultBodyLimit::max(state.config.storage.max_upload_size as usize * 2);

    // Public routes (no auth required)
    let mut public_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login));

    if state.config.storage.allow_public_view {
        public_routes = public_routes.route(
            "/public/files/:id",
            get(handlers::file::view_public_file),
        );
    }

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/profile", get(handlers::auth::profile))
        .route("/files", get(handlers::file::list_files))
        .route("/files/upload", post(handlers::file::upload_file))
        .route(
            "/files/:id",
            get(handlers::file::download_file).delete(handlers::file::delete_file),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
