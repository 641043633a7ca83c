//! Long-lived attribution sessions carried in the `naano_attribution` cookie

use anyhow::Result;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

use crate::models::{AttributionSession, SESSION_TTL_SECS};
use crate::storage::Storage;

pub const COOKIE_NAME: &str = "naano_attribution";

/// Session id from the request cookies, when one is present and is a UUID
pub fn session_from_cookies(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .and_then(|(_, value)| Uuid::parse_str(value.trim().trim_matches('"')).ok())
}

/// Reuse the cookie's session while it is still alive, otherwise issue a
/// new one. Unknown but well-formed ids are adopted.
pub async fn resolve_session(
    storage: &dyn Storage,
    cookie: Option<Uuid>,
    now: i64,
) -> Result<AttributionSession> {
    if let Some(id) = cookie {
        let session = storage.touch_session(id, now).await?;
        if !session.is_expired(now) {
            return Ok(session);
        }
        tracing::debug!(session_id = %id, "Attribution session expired, issuing a new one");
    }

    storage.touch_session(Uuid::new_v4(), now).await
}

/// Session used when storage did not answer within the redirect budget.
/// The cookie id is kept so the visitor's history stays linked.
pub fn fallback_session(cookie: Option<Uuid>, now: i64) -> AttributionSession {
    AttributionSession {
        id: cookie.unwrap_or_else(Uuid::new_v4),
        created_at: now,
        last_seen_at: now,
    }
}

/// `Set-Cookie` value for the session. The thirty days run from first
/// issuance, so Max-Age is what is left of them: a visitor returning on day
/// 29 gets a one-day cookie and a fresh session after that.
pub fn cookie_header(session: &AttributionSession, now: i64, secure: bool) -> String {
    let max_age = session.remaining_secs(now).min(SESSION_TTL_SECS);
    let mut cookie = format!(
        "{COOKIE_NAME}={}; Max-Age={max_age}; Path=/; SameSite=Lax; HttpOnly",
        session.id
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
