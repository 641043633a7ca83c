pub mod classify;
pub mod client_ip;
pub mod destination;
pub mod handlers;
pub mod interstitial;
pub mod middleware;
pub mod routes;

use thiserror::Error;

pub use routes::create_redirect_router;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("tracked link not found")]
    NotFound,
    #[error("tracked link lookup exceeded the redirect budget")]
    LookupTimeout,
    #[error("invalid destination '{url}': {reason}")]
    InvalidDestination { url: String, reason: String },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
