use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use availability_cell::router::{availability_routes, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Scheduling API is running!" }))
        .nest("/availability", availability_routes(state))
}
