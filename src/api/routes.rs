use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::analytics::{company_intent, list_leads};
use super::handlers::{
    confirm_engagement, enrich_event, health_check, update_attribution, AppState,
};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let internal = Router::new()
        .route("/enrich", post(enrich_event))
        .route("/confirm-engagement", post(confirm_engagement))
        .route("/events/{id}/attribution", put(update_attribution))
        .route("/leads", get(list_leads))
        .route("/companies/{name}/intent", get(company_intent));

    Router::new()
        .nest("/internal", internal)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
