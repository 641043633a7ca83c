//! Click or impression, decided from request headers alone

use axum::http::{header, HeaderMap};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::EventType;

static PREVIEW_AGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(bot\b|crawler|spider|preview|facebookexternalhit|slackbot|twitterbot|linkedinbot|whatsapp|telegrambot|discordbot|embedly|skypeuripreview|vkshare|headlesschrome|curl/|wget/)",
    )
    .expect("preview agent regex is valid")
});

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_preview_agent(headers: &HeaderMap) -> bool {
    header_str(headers, header::USER_AGENT.as_str()).is_some_and(|ua| PREVIEW_AGENT.is_match(ua))
}

fn is_prefetch(headers: &HeaderMap) -> bool {
    ["sec-purpose", "purpose", "x-purpose", "x-moz"]
        .iter()
        .filter_map(|name| header_str(headers, name))
        .any(|value| {
            let value = value.to_ascii_lowercase();
            value.contains("prefetch") || value.contains("preview") || value.contains("prerender")
        })
}

/// Host of the request, without port
fn request_host(headers: &HeaderMap) -> Option<String> {
    let host = header_str(headers, header::HOST.as_str())?;
    let host = host.rsplit_once(':').map_or(host, |(name, port)| {
        if port.bytes().all(|b| b.is_ascii_digit()) {
            name
        } else {
            host
        }
    });
    Some(host.to_ascii_lowercase())
}

/// A referrer from another site means a person followed the link
fn has_external_referrer(headers: &HeaderMap) -> bool {
    let Some(referrer) = header_str(headers, header::REFERER.as_str()) else {
        return false;
    };
    let Some(referrer_host) = url::Url::parse(referrer)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    request_host(headers).is_none_or(|host| host != referrer_host)
}

fn is_user_navigation(headers: &HeaderMap) -> bool {
    if header_str(headers, "sec-fetch-user") == Some("?1") {
        return true;
    }
    header_str(headers, "sec-fetch-dest") == Some("document")
        && header_str(headers, "sec-fetch-mode") == Some("navigate")
}

/// Prefetches and link-preview fetchers are impressions no matter what
/// else they send. Everything else is a click when it carries a sign of a
/// human navigation.
pub fn classify_request(headers: &HeaderMap) -> EventType {
    if is_prefetch(headers) || is_preview_agent(headers) {
        return EventType::Impression;
    }
    if has_external_referrer(headers) || is_user_navigation(headers) {
        EventType::Click
    } else {
        EventType::Impression
    }
}
