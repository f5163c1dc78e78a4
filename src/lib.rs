pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::AppConfig;
use crate::services::store::Store;
use axum::{Router, extract::DefaultBodyLimit, middleware::from_fn, routing::post};
use std::sync::Arc;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::archive::post_archive),
    components(schemas(api::error::ErrorBody)),
    tags(
        (name = "archive", description = "Upload files and download them as a ZIP archive")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/archive", post(handlers::archive::post_archive))
        .route("/archive/", post(handlers::archive::post_archive))
        .fallback(handlers::archive::not_found)
        // Request size is enforced by the ingestor
        .layer(DefaultBodyLimit::disable())
        .layer(api::middleware::trace::trace_layer())
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
