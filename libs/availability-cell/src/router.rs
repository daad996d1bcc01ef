use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::{auth_middleware, JwtSecretSource};

use crate::handlers;
use crate::services::AvailabilityService;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: AvailabilityService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let service = AvailabilityService::from_config(&config);
        Self { config, service }
    }

    pub fn with_service(config: Arc<AppConfig>, service: AvailabilityService) -> Self {
        Self { config, service }
    }
}

impl JwtSecretSource for AppState {
    fn jwt_secret(&self) -> &str {
        self.config.jwt_secret()
    }
}

pub fn availability_routes(state: Arc<AppState>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/search", get(handlers::search_availability))
        .route("/provider/{provider_id}", get(handlers::get_provider_availability))
        .route("/{id}", get(handlers::get_availability))
        .route("/{id}/check", get(handlers::check_slot_availability))
        .route("/{id}/slots", get(handlers::get_time_slots));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/", post(handlers::create_availability))
        .route("/{id}", put(handlers::update_availability).delete(handlers::delete_availability))
        .route("/{id}/book", post(handlers::book_slot))
        .route("/{id}/cancel", post(handlers::cancel_slot))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware::<AppState>));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
