use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode,
    },
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant as Deadline};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::classify::classify_request;
use super::client_ip::extract_client_ip;
use super::destination::{parse_destination, with_tracking_params};
use super::interstitial;
use super::middleware::RequestStart;
use super::GatewayError;
use crate::config::{ClientIpConfig, RedirectConfig};
use crate::events::{EngagementError, EventLogger, Visit};
use crate::models::{is_valid_hash, now_ts, AttributionSession, EventType, TrackedLink};
use crate::pipeline::{Job, Pipeline};
use crate::session::{cookie_header, fallback_session, resolve_session, session_from_cookies};
use crate::storage::Storage;

const LOOKUP_BUDGET_SHARE: u32 = 3;

pub struct GatewayState {
    pub storage: Arc<dyn Storage>,
    pub events: EventLogger,
    pub pipeline: Pipeline,
    pub redirect: RedirectConfig,
    pub client_ip: ClientIpConfig,
}

impl GatewayState {
    fn fallback(&self) -> Response {
        Redirect::temporary(&self.redirect.default_redirect_url).into_response()
    }

    fn deadline(&self) -> Deadline {
        Deadline::now() + self.redirect.budget()
    }

    /// The lookup may use a third of the budget; the rest is left for the
    /// session and the event insert.
    async fn find_link(
        &self,
        hash: &str,
        deadline: Deadline,
    ) -> Result<(TrackedLink, bool), GatewayError> {
        if !is_valid_hash(hash) {
            return Err(GatewayError::NotFound);
        }
        let lookup_deadline = Deadline::now() + self.redirect.budget() / LOOKUP_BUDGET_SHARE;
        let lookup = timeout_at(
            lookup_deadline.min(deadline),
            self.storage.get_link_with_metadata(hash),
        )
        .await
        .map_err(|_| GatewayError::LookupTimeout)??;
        match lookup.link {
            Some(link) => Ok((link, lookup.metadata.cache_hit)),
            None => Err(GatewayError::NotFound),
        }
    }

    /// Session for this request, within the budget. On timeout or failure
    /// the visitor keeps their cookie id and nothing blocks the redirect.
    async fn session(&self, headers: &HeaderMap, now: i64, deadline: Deadline) -> AttributionSession {
        let cookie = session_from_cookies(headers);
        match timeout_at(deadline, resolve_session(self.storage.as_ref(), cookie, now)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to resolve attribution session");
                fallback_session(cookie, now)
            }
            Err(_) => {
                warn!("Session resolution exceeded the redirect budget");
                fallback_session(cookie, now)
            }
        }
    }

    /// Insert the event off the request task and hand it to the pipeline.
    /// The handler only waits for the id until the deadline; a late insert
    /// still completes and is still attributed.
    async fn record_event(
        &self,
        link: &TrackedLink,
        event_type: EventType,
        session_id: Uuid,
        visit: Visit,
        deadline: Deadline,
    ) -> Option<i64> {
        let (tx, rx) = oneshot::channel();
        let events = self.events.clone();
        let pipeline = self.pipeline.clone();
        let link = link.clone();

        tokio::spawn(async move {
            match events.log(&link, event_type, session_id, &visit).await {
                Ok(event) => {
                    let _ = tx.send(event.id);
                    pipeline.submit(Job::Attribute { event, link });
                }
                Err(e) => warn!(
                    tracked_link_id = link.id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to log event"
                ),
            }
        });

        match timeout_at(deadline, rx).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(event_type = %event_type, "Event insert exceeded the redirect budget");
                None
            }
        }
    }

    fn visit(&self, headers: &HeaderMap, addr: SocketAddr) -> Visit {
        let header_string = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Visit {
            ip: extract_client_ip(headers, addr.ip(), &self.client_ip),
            user_agent: header_string(header::USER_AGENT),
            referrer: header_string(header::REFERER),
        }
    }
}

/// Track a visit to a link and send the visitor on through the interstitial
pub async fn track_link(
    State(state): State<Arc<GatewayState>>,
    Path(hash): Path<String>,
    Extension(request_start): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let handler_start = Instant::now();
    let deadline = state.deadline();

    let (link, cache_hit) = match state.find_link(&hash, deadline).await {
        Ok(found) => found,
        Err(GatewayError::NotFound) => {
            debug!(hash = %hash, "Unknown tracked link");
            return state.fallback();
        }
        Err(e) => {
            warn!(hash = %hash, error = %e, "Tracked link lookup failed");
            return state.fallback();
        }
    };

    let destination = match parse_destination(&link.destination_url) {
        Ok(url) => url,
        Err(e) => {
            error!(hash = %hash, tracked_link_id = link.id, error = %e, "Tracked link has an unusable destination");
            return state.fallback();
        }
    };

    let now = now_ts();
    let session = state.session(&headers, now, deadline).await;

    let event_type = classify_request(&headers);
    let event_id = if link.tracks(event_type) {
        let visit = state.visit(&headers, addr);
        state
            .record_event(&link, event_type, session.id, visit, deadline)
            .await
    } else {
        debug!(hash = %hash, event_type = %event_type, "Tracking disabled for event type");
        None
    };

    let destination = with_tracking_params(destination, &link, session.id);
    let mut response = Html(interstitial::render(&destination, event_id)).into_response();

    let response_headers = response.headers_mut();
    match HeaderValue::from_str(&cookie_header(&session, now, state.redirect.cookie_secure)) {
        Ok(cookie) => {
            response_headers.insert(header::SET_COOKIE, cookie);
        }
        Err(e) => warn!(error = %e, "Attribution cookie is not a valid header value"),
    }
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(
        "x-naano-cache-hit",
        HeaderValue::from_static(if cache_hit { "true" } else { "false" }),
    );
    response_headers.insert(
        "x-naano-timing-handler-ms",
        HeaderValue::from(handler_start.elapsed().as_millis() as u64),
    );
    response_headers.insert(
        "x-naano-timing-total-ms",
        HeaderValue::from(request_start.elapsed_ms()),
    );

    response
}

/// Link unfurlers issue HEAD requests. They are answered with 200 and, when
/// the link tracks them, logged as impressions.
pub async fn track_link_head(
    State(state): State<Arc<GatewayState>>,
    Path(hash): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> StatusCode {
    let deadline = state.deadline();

    match state.find_link(&hash, deadline).await {
        Ok((link, _)) if link.tracks(EventType::Impression) => {
            // No cookie goes back on HEAD, so a new session would never be seen again
            let session = fallback_session(session_from_cookies(&headers), now_ts());
            let visit = state.visit(&headers, addr);
            state
                .record_event(&link, EventType::Impression, session.id, visit, deadline)
                .await;
        }
        Ok(_) | Err(GatewayError::NotFound) => {}
        Err(e) => warn!(hash = %hash, error = %e, "Tracked link lookup failed"),
    }

    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct EngagementReport {
    #[serde(rename = "eventID")]
    pub event_id: i64,
    #[serde(rename = "timeOnSiteSeconds")]
    pub time_on_site_seconds: i64,
}

/// Beacons are sent without a JSON content type, so the body is parsed
/// whatever the request declares
pub async fn engagement_response(events: &EventLogger, body: &[u8]) -> Response {
    let report: EngagementReport = match serde_json::from_slice(body) {
        Ok(report) => report,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid engagement report: {e}") })),
            )
                .into_response()
        }
    };

    match events
        .confirm_engagement(report.event_id, report.time_on_site_seconds)
        .await
    {
        Ok(updated) => Json(json!({ "updated": updated })).into_response(),
        Err(e @ (EngagementError::NegativeDuration | EngagementError::NotAClick(_))) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e @ EngagementError::UnknownEvent(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(EngagementError::Storage(e)) => {
            error!(event_id = report.event_id, error = %e, "Failed to record engagement");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to record engagement" })),
            )
                .into_response()
        }
    }
}

pub async fn confirm_engagement(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    engagement_response(&state.events, &body).await
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}
