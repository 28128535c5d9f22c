use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::events::{create_event, delete_event, list_event_registrations, list_events};
use crate::handlers::health_check;
use crate::handlers::registrations::{
    check_in_registration, check_in_token, create_registration, registration_qrcode,
};
use crate::state::AppState;

/// API routes without the outer middleware stack.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", get(list_events).post(create_event))
        .route("/events/:id", delete(delete_event))
        .route("/events/:id/registrations", get(list_event_registrations))
        .route("/registrations", post(create_registration))
        .route("/registrations/:id/qrcode", get(registration_qrcode))
        .route("/registrations/:id/check-in", post(check_in_registration))
        .route("/check-in", post(check_in_token))
        .with_state(state)
}

pub fn create_routes(state: AppState, cors_allowed_origins: &str) -> Router {
    api_routes(state)
        .layer(create_security_headers_layer())
        .layer(create_cors_layer(cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}
