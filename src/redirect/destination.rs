use url::Url;
use uuid::Uuid;

use super::GatewayError;
use crate::models::TrackedLink;

/// Query parameters owned by the gateway; stale copies on the stored
/// destination are replaced
const TRACKING_PARAMS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_content",
    "utm_campaign",
    "naano_session",
];

/// Parse and check a stored destination. Only absolute http(s) URLs with a
/// host are followed.
pub fn parse_destination(raw: &str) -> Result<Url, GatewayError> {
    let invalid = |reason: String| GatewayError::InvalidDestination {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Destination with the attribution parameters appended
pub fn with_tracking_params(mut url: Url, link: &TrackedLink, session_id: Uuid) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(kept);
        query
            .append_pair("utm_source", "naano")
            .append_pair("utm_medium", "ambassador")
            .append_pair("utm_content", &link.creator_id)
            .append_pair("utm_campaign", &link.collaboration_id)
            .append_pair("naano_session", &session_id.to_string());
    }
    url
}
