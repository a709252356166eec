use axum::{Router, routing::{get, post}};
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::cors::{CorsLayer, AllowOrigin};
use axum::http::Method;
use crate::AppState;
use crate::api::{handlers, handlers_checkin};

// Phone cameras produce large JPEGs; leave room above axum's 2 MB default
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any()) // The mobile client and web dashboard are served from other origins
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/login", post(handlers::login))
        .route("/checkin", post(handlers_checkin::checkin))
        .route("/attendance/history", get(handlers::history))
        .route("/attendance/history_teacher", get(handlers::history_teacher))
        .route("/attendance/export_excel", get(handlers::export_excel))
        .route("/classes", get(handlers::classes))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}
