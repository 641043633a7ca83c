//! Per-session intent scoring

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashSet;
use url::Url;
use uuid::Uuid;

use super::decay::{days_old, recency_weight};
use crate::models::{is_qualified_engagement, EventType, IntentSignals, NewIntentScore};
use crate::storage::SessionVisit;

pub const MAX_SCORE: i64 = 100;

const CLICK_POINTS: i64 = 20;
const IMPRESSION_POINTS: i64 = 5;
const REPEAT_VISIT_POINTS: i64 = 15;
const POINTS_PER_EXTRA_VISIT: i64 = 5;
const MAX_VISIT_POINTS: i64 = 20;
const MULTI_LINK_POINTS: i64 = 5;
const PRICING_POINTS: i64 = 20;
const SECURITY_POINTS: i64 = 15;
const INTEGRATIONS_POINTS: i64 = 10;
const BUSINESS_HOURS_POINTS: i64 = 10;
const ENGAGEMENT_POINTS: i64 = 10;

const PRICING_SEGMENTS: &[&str] = &["pricing", "plans", "price", "buy", "checkout"];
const SECURITY_SEGMENTS: &[&str] = &["security", "trust", "compliance", "soc2", "gdpr"];
const INTEGRATION_SEGMENTS: &[&str] = &["integrations", "integration", "apps", "marketplace"];

/// The event being scored
#[derive(Debug, Clone, Copy)]
pub struct ScoredEvent {
    pub event_id: i64,
    pub session_id: Uuid,
    pub event_type: EventType,
    pub occurred_at: i64,
}

/// Page categories a destination URL points at
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageViews {
    pub pricing: bool,
    pub security: bool,
    pub integrations: bool,
}

impl PageViews {
    pub fn from_url(destination: &str) -> Self {
        let Ok(url) = Url::parse(destination) else {
            return Self::default();
        };
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.map(str::to_ascii_lowercase).collect())
            .unwrap_or_default();
        let has = |wanted: &[&str]| segments.iter().any(|s| wanted.contains(&s.as_str()));

        Self {
            pricing: has(PRICING_SEGMENTS),
            security: has(SECURITY_SEGMENTS),
            integrations: has(INTEGRATION_SEGMENTS),
        }
    }

    fn merge(self, other: PageViews) -> Self {
        Self {
            pricing: self.pricing || other.pricing,
            security: self.security || other.security,
            integrations: self.integrations || other.integrations,
        }
    }
}

/// Monday to Friday, 09:00 to 18:00 UTC
pub fn is_business_hours(ts: i64) -> bool {
    let Some(at) = DateTime::<Utc>::from_timestamp(ts, 0) else {
        return false;
    };
    !matches!(at.weekday(), Weekday::Sat | Weekday::Sun) && (9..18).contains(&at.hour())
}

/// Score `event` against everything the session has done so far.
///
/// `visits` is the session history as returned by storage and may include
/// the scored event itself; anything after it is ignored.
pub fn score_session(event: ScoredEvent, visits: &[SessionVisit], now: i64) -> NewIntentScore {
    let history: Vec<&SessionVisit> = visits
        .iter()
        .filter(|v| v.event_id <= event.event_id && v.occurred_at <= event.occurred_at)
        .collect();
    let prior: Vec<&SessionVisit> = history
        .iter()
        .copied()
        .filter(|v| v.event_id != event.event_id)
        .collect();

    let visit_count = (prior.len() + 1) as i64;
    let is_repeat_visit = !prior.is_empty();
    let distinct_links = history
        .iter()
        .map(|v| v.tracked_link_id)
        .collect::<HashSet<_>>()
        .len()
        .max(1) as i64;
    let pages = history
        .iter()
        .fold(PageViews::default(), |acc, v| acc.merge(PageViews::from_url(&v.destination_url)));
    let engaged = prior
        .iter()
        .any(|v| is_qualified_engagement(v.event_type, v.time_on_site_seconds));
    let business_hours = is_business_hours(event.occurred_at);
    let session_started = history.first().map_or(event.occurred_at, |v| v.occurred_at);

    let mut contributions: Vec<(String, i64)> = Vec::new();
    let mut add = |name: &str, points: i64| {
        if points > 0 {
            contributions.push((name.to_string(), points));
        }
    };

    add(
        "event_type",
        match event.event_type {
            EventType::Click => CLICK_POINTS,
            EventType::Impression => IMPRESSION_POINTS,
        },
    );
    if is_repeat_visit {
        add("repeat_visit", REPEAT_VISIT_POINTS);
    }
    add(
        "visit_count",
        ((visit_count - 1) * POINTS_PER_EXTRA_VISIT).min(MAX_VISIT_POINTS),
    );
    if distinct_links > 1 {
        add("multiple_links", MULTI_LINK_POINTS);
    }
    if pages.pricing {
        add("viewed_pricing", PRICING_POINTS);
    }
    if pages.security {
        add("viewed_security", SECURITY_POINTS);
    }
    if pages.integrations {
        add("viewed_integrations", INTEGRATIONS_POINTS);
    }
    if business_hours {
        add("business_hours", BUSINESS_HOURS_POINTS);
    }
    if engaged {
        add("engaged", ENGAGEMENT_POINTS);
    }

    let score = contributions
        .iter()
        .map(|(_, points)| points)
        .sum::<i64>()
        .clamp(0, MAX_SCORE);

    NewIntentScore {
        event_id: event.event_id,
        session_id: event.session_id,
        score,
        is_repeat_visit,
        visit_count,
        viewed_pricing: pages.pricing,
        viewed_security: pages.security,
        viewed_integrations: pages.integrations,
        signals: IntentSignals {
            event_type: event.event_type.to_string(),
            visit_count,
            distinct_links,
            viewed_pricing: pages.pricing,
            viewed_security: pages.security,
            viewed_integrations: pages.integrations,
            business_hours,
            engaged,
            session_age_days: days_old(session_started, event.occurred_at),
            contributions,
        },
        recency_weight: recency_weight(event.occurred_at, now),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-06 14:00:00 UTC, a Wednesday
    const WEDNESDAY_AFTERNOON: i64 = 1_709_733_600;
    // 2024-03-09 14:00:00 UTC, a Saturday
    const SATURDAY_AFTERNOON: i64 = 1_709_992_800;

    fn visit(event_id: i64, link: i64, url: &str, event_type: EventType, at: i64) -> SessionVisit {
        SessionVisit {
            event_id,
            tracked_link_id: link,
            destination_url: url.to_string(),
            event_type,
            time_on_site_seconds: None,
            occurred_at: at,
        }
    }

    fn scored(event_id: i64, event_type: EventType, at: i64) -> ScoredEvent {
        ScoredEvent {
            event_id,
            session_id: Uuid::new_v4(),
            event_type,
            occurred_at: at,
        }
    }

    #[test]
    fn test_page_views_match_path_segments() {
        let views = PageViews::from_url("https://acme.dev/en/Pricing?plan=team");
        assert!(views.pricing);
        assert!(!views.security);

        let views = PageViews::from_url("https://acme.dev/trust/soc2");
        assert!(views.security);

        // Hosts and query strings are not page views
        let views = PageViews::from_url("https://pricing.acme.dev/?q=integrations");
        assert_eq!(views, PageViews::default());

        assert_eq!(PageViews::from_url("not a url"), PageViews::default());
    }

    #[test]
    fn test_business_hours() {
        assert!(is_business_hours(WEDNESDAY_AFTERNOON));
        assert!(!is_business_hours(SATURDAY_AFTERNOON));
        assert!(!is_business_hours(WEDNESDAY_AFTERNOON + 6 * 3600));
    }

    #[test]
    fn test_first_click_on_weekend() {
        let at = SATURDAY_AFTERNOON;
        let visits = vec![visit(1, 1, "https://acme.dev/", EventType::Click, at)];
        let score = score_session(scored(1, EventType::Click, at), &visits, at);

        assert_eq!(score.score, CLICK_POINTS);
        assert!(!score.is_repeat_visit);
        assert_eq!(score.visit_count, 1);
        assert_eq!(score.recency_weight, 1.0);
    }

    #[test]
    fn test_returning_visitor_on_pricing_scores_higher() {
        let at = WEDNESDAY_AFTERNOON;
        let mut first = visit(1, 1, "https://acme.dev/blog", EventType::Click, at - 3600);
        first.time_on_site_seconds = Some(45);
        let visits = vec![
            first,
            visit(2, 2, "https://acme.dev/pricing", EventType::Click, at),
        ];

        let score = score_session(scored(2, EventType::Click, at), &visits, at);

        assert!(score.is_repeat_visit);
        assert_eq!(score.visit_count, 2);
        assert!(score.viewed_pricing);
        assert!(score.signals.engaged);
        assert!(score.signals.business_hours);
        assert_eq!(score.signals.distinct_links, 2);
        assert_eq!(
            score.score,
            CLICK_POINTS
                + REPEAT_VISIT_POINTS
                + POINTS_PER_EXTRA_VISIT
                + MULTI_LINK_POINTS
                + PRICING_POINTS
                + BUSINESS_HOURS_POINTS
                + ENGAGEMENT_POINTS
        );
    }

    #[test]
    fn test_later_visits_are_ignored() {
        let at = SATURDAY_AFTERNOON;
        let visits = vec![
            visit(1, 1, "https://acme.dev/", EventType::Impression, at),
            visit(2, 1, "https://acme.dev/pricing", EventType::Click, at + 60),
        ];
        let score = score_session(scored(1, EventType::Impression, at), &visits, at + 120);

        assert_eq!(score.visit_count, 1);
        assert!(!score.viewed_pricing);
        assert_eq!(score.score, IMPRESSION_POINTS);
    }

    #[test]
    fn test_score_is_capped() {
        let at = WEDNESDAY_AFTERNOON;
        let mut visits: Vec<SessionVisit> = (1..=20)
            .map(|i| {
                let mut v = visit(
                    i,
                    i,
                    "https://acme.dev/pricing/security/integrations",
                    EventType::Click,
                    at - 1000 + i,
                );
                v.time_on_site_seconds = Some(30);
                v
            })
            .collect();
        visits.push(visit(21, 1, "https://acme.dev/", EventType::Click, at));

        let score = score_session(scored(21, EventType::Click, at), &visits, at);
        assert_eq!(score.score, MAX_SCORE);
        assert!(score.signals.contributions.iter().map(|(_, p)| p).sum::<i64>() > MAX_SCORE);
    }
}
