use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers::{confirm_engagement, health_check, track_link, track_link_head, GatewayState};
use super::interstitial::ENGAGEMENT_PATH;
use super::middleware::record_request_start;

pub fn create_redirect_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/c/{hash}", get(track_link).head(track_link_head))
        .route(ENGAGEMENT_PATH, post(confirm_engagement))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
